// Key management CLI for the harness
// Stores deployment signer keys encrypted on disk and checks env-provided keys

use clap::{Parser, Subcommand};
use pickle_harness::keystore::{EvmKey, KeyManager, KeyManagerConfig};
use std::io::{self, Write};

#[derive(Parser)]
#[clap(name = "key-manager")]
#[clap(about = "Pickle harness key management tool")]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new key to the keystore
    Add {
        /// Key id (e.g. "prev-admin")
        key_id: String,
        /// Import from private key (hex, optionally prefixed with address:)
        #[clap(short, long)]
        private_key: Option<String>,
    },
    /// List all keys in the keystore
    List,
    /// Show the address of a key
    Show {
        key_id: String,
    },
    /// Remove a key from the keystore
    Remove {
        key_id: String,
    },
    /// Export a key (for backup)
    Export {
        key_id: String,
    },
    /// Test key loading from environment variables
    TestEnv {
        key_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = KeyManagerConfig::default();
    let mut key_manager = KeyManager::new(config)?;

    match cli.command {
        Commands::Add { key_id, private_key } => {
            add_key(&mut key_manager, &key_id, private_key).await?;
        }
        Commands::List => {
            list_keys(&key_manager).await?;
        }
        Commands::Show { key_id } => {
            show_key(&mut key_manager, &key_id).await?;
        }
        Commands::Remove { key_id } => {
            remove_key(&mut key_manager, &key_id).await?;
        }
        Commands::Export { key_id } => {
            export_key(&mut key_manager, &key_id).await?;
        }
        Commands::TestEnv { key_id } => {
            test_env_key(&key_manager, &key_id)?;
        }
    }

    Ok(())
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{} (y/N): ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

async fn add_key(
    key_manager: &mut KeyManager,
    key_id: &str,
    private_key: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Adding key: {}", key_id);

    let private_key = match private_key {
        Some(pk) => pk,
        None => rpassword::prompt_password("Enter private key (hex): ")?,
    };
    let key = EvmKey::from_env_string(&private_key)?;
    println!("Address: {}", key.address);

    let password = rpassword::prompt_password("Enter password to encrypt the key: ")?;
    let repeated = rpassword::prompt_password("Repeat password: ")?;
    if password != repeated {
        return Err("Passwords do not match".into());
    }

    key_manager.store_key(key_id, key, &password).await?;

    println!("Key '{}' added", key_id);
    Ok(())
}

async fn list_keys(key_manager: &KeyManager) -> Result<(), Box<dyn std::error::Error>> {
    let keys = key_manager.list_keys().await?;
    if keys.is_empty() {
        println!("No keys found in keystore.");
        return Ok(());
    }

    println!("Available keys:");
    for key_id in keys {
        println!("  {}", key_id);
    }
    Ok(())
}

async fn load(key_manager: &mut KeyManager, key_id: &str) -> Result<EvmKey, Box<dyn std::error::Error>> {
    // environment first; that needs no password
    if let Ok(key) = key_manager.load_key(key_id, None).await {
        return Ok(key);
    }
    let password = rpassword::prompt_password(format!("Password for '{}': ", key_id))?;
    Ok(key_manager.load_key(key_id, Some(&password)).await?)
}

async fn show_key(key_manager: &mut KeyManager, key_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    match load(key_manager, key_id).await {
        Ok(key) => {
            println!("Key: {}", key_id);
            println!("  Address: {}", key.address);
        }
        Err(e) => {
            println!("Failed to load key: {}", e);
            println!("Try setting environment variable: {}", key_manager.env_var_name(key_id));
        }
    }
    Ok(())
}

async fn remove_key(key_manager: &mut KeyManager, key_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm(&format!("Are you sure you want to remove key {}?", key_id))? {
        println!("Cancelled.");
        return Ok(());
    }

    key_manager.remove_key(key_id).await?;
    println!("Key removed: {}", key_id);
    Ok(())
}

async fn export_key(key_manager: &mut KeyManager, key_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("WARNING: This will display your private key in plain text!");
    if !confirm("Continue?")? {
        println!("Cancelled.");
        return Ok(());
    }

    load(key_manager, key_id).await?;
    println!("{}", key_manager.export_key(key_id)?);
    Ok(())
}

fn test_env_key(key_manager: &KeyManager, key_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_var = key_manager.env_var_name(key_id);
    println!("Expected env var: {}", env_var);

    match key_manager.load_from_env(key_id) {
        Ok(key) => {
            println!("Loaded key from environment");
            println!("  Address: {}", key.address);
        }
        Err(e) => {
            println!("Failed to load key from environment: {}", e);
            println!("Set it with:");
            println!("  export {}=<address:>private_key_hex", env_var);
        }
    }
    Ok(())
}
