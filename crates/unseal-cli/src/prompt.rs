//! Interactive key entry for when no kit yields a key.

use std::io::{self, IsTerminal};

use secrecy::SecretString;
use zeroize::Zeroizing;

use unseal_core::{UnsealError, UnsealResult};
use unseal_crypto::validate_key;

/// Whether prompting is possible at all: stdin must be a terminal.
pub fn can_prompt() -> bool {
    io::stdin().is_terminal()
}

/// Ask for the key with hidden input until a well-formed one is entered.
///
/// An empty answer gives up with `KeyNotFound`. With `legacy` any non-empty
/// password is accepted as is.
pub fn prompt_key(legacy: bool) -> UnsealResult<SecretString> {
    eprintln!();
    if legacy {
        eprintln!("Enter the backup password.");
    } else {
        eprintln!("Enter your encryption key manually.");
        eprintln!("It has the format XXXX-XXXX-XXXX-XXXX-XXXX-XXXX-XXXX");
    }

    loop {
        let answer = Zeroizing::new(rpassword::prompt_password("Key: ")?);
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(UnsealError::KeyNotFound("no key entered".into()));
        }
        if legacy {
            return Ok(SecretString::from(answer));
        }
        match validate_key(answer) {
            Ok(key) => {
                eprintln!("Key format verified");
                return Ok(key);
            }
            Err(_) => eprintln!("Invalid key format, please try again."),
        }
    }
}
