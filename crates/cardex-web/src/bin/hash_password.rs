//! Prints an argon2 hash for a seed user's `password_hash` config field.

use std::io::{self, Write};
use std::process::ExitCode;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};

fn main() -> ExitCode {
    eprint!("Enter password: ");
    let _ = io::stderr().flush();

    let mut password = String::new();
    if let Err(e) = io::stdin().read_line(&mut password) {
        eprintln!("Failed to read password: {e}");
        return ExitCode::FAILURE;
    }
    let password = password.trim();

    if password.is_empty() {
        eprintln!("Password cannot be empty");
        return ExitCode::FAILURE;
    }

    let salt = SaltString::generate(&mut OsRng);
    match Argon2::default().hash_password(password.as_bytes(), &salt) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to hash password: {e}");
            ExitCode::FAILURE
        }
    }
}
