#!/usr/bin/env cargo
//! Password hashing utility for the helpdesk
//!
//! Generates Argon2id password hashes for seeding staff accounts without
//! exposing plaintext passwords.
//!
//! Usage:
//!   cargo run --bin hash-password
//!   cargo run --bin hash-password "MySecurePassword123!"
//!   cargo run --bin hash-password -- --generate

use helpdesk_api::auth::{generate_compliant_password, hash_password, validate_password_strength};
use std::env;
use std::io::{self, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let arg = env::args().nth(1);

    let (password, generated) = match arg.as_deref() {
        Some("--generate") => (generate_compliant_password(), true),
        Some(pwd) => (pwd.to_string(), false),
        None => {
            // Read password from stdin (doesn't show in process list)
            print!("Enter password to hash: ");
            io::stdout().flush()?;

            let mut password = String::new();
            io::stdin().read_line(&mut password)?;
            (password.trim().to_string(), false)
        }
    };

    if password.is_empty() {
        eprintln!("Error: Password cannot be empty");
        std::process::exit(1);
    }

    // The login and change-password flows enforce the same policy
    if let Err(e) = validate_password_strength(&password) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let password_hash = hash_password(&password)?;

    if generated {
        println!("\nGenerated password (shown once): {}", password);
    }

    println!("\n===========================================");
    println!("Password Hash (Argon2id):");
    println!("===========================================");
    println!("{}", password_hash);
    println!("===========================================\n");

    println!("Example SQL:");
    println!(
        "UPDATE users SET password_hash = '{}', password_changed_at = NOW(), \
         password_expires_at = NOW() + INTERVAL '90 days' WHERE email = 'agent@example.com';",
        password_hash
    );

    Ok(())
}
