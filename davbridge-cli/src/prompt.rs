//! Terminal input for interactive enrollment.

use std::io::{BufRead, Write};

use davbridge_core::{AuthError, Prompt, Secret};

/// Reads answers from the controlling terminal.
///
/// Secrets are read without echo; prompts go to stderr so stdout carries
/// only the bridge password.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn secret(&mut self, label: &str) -> Result<Secret, AuthError> {
        rpassword::prompt_password(format!("{}: ", label))
            .map(Secret::new)
            .map_err(|e| AuthError::Prompt {
                message: format!("failed to read {}: {}", label, e),
            })
    }

    fn line(&mut self, label: &str) -> Result<String, AuthError> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{}: ", label)
            .and_then(|_| stderr.flush())
            .map_err(|e| AuthError::Prompt {
                message: e.to_string(),
            })?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| AuthError::Prompt {
                message: format!("failed to read {}: {}", label, e),
            })?;

        Ok(line.trim().to_string())
    }
}
