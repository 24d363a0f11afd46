//! Password handling for CLI operations.

use std::future::Future;
use std::pin::Pin;

use archivist::{Password, PasswordProvider, PasswordQuery};
use indicatif::ProgressBar;
use rpassword::prompt_password;

/// Answers password queries from the command line, then from the terminal.
///
/// The `--password` value is offered first. Once it is rejected, or when
/// none was given, the user is prompted unless prompting is disabled.
pub struct PromptPassword {
    provided: Option<Password>,
    interactive: bool,
    bar: ProgressBar,
}

impl PromptPassword {
    pub fn new(provided: Option<String>, interactive: bool, bar: ProgressBar) -> Self {
        Self {
            provided: provided.filter(|p| !p.is_empty()).map(Password::new),
            interactive,
            bar,
        }
    }
}

impl PasswordProvider for PromptPassword {
    fn get_password<'a>(
        &'a self,
        query: &'a PasswordQuery,
    ) -> Pin<Box<dyn Future<Output = Option<Password>> + Send + 'a>> {
        Box::pin(async move {
            if !query.incorrect_try_again {
                if let Some(password) = &self.provided {
                    return Some(password.clone());
                }
            }
            if !self.interactive {
                return None;
            }

            let prompt = if query.incorrect_try_again {
                format!("Wrong password for {}, try again: ", query.archive.display())
            } else {
                format!("Password for {}: ", query.archive.display())
            };
            let bar = self.bar.clone();
            tokio::task::spawn_blocking(move || bar.suspend(|| prompt_password(prompt)))
                .await
                .ok()?
                .ok()
                .filter(|p| !p.is_empty())
                .map(Password::new)
        })
    }
}

/// Prompts for a new password twice (for creating encrypted archives)
pub fn confirm_password() -> Option<Password> {
    let pwd1 = match prompt_password("Enter password: ") {
        Ok(pwd) => pwd,
        Err(_) => return None,
    };

    if pwd1.is_empty() {
        eprintln!("Password cannot be empty");
        return None;
    }

    let pwd2 = match prompt_password("Confirm password: ") {
        Ok(pwd) => pwd,
        Err(_) => return None,
    };

    if pwd1 == pwd2 {
        Some(Password::new(pwd1))
    } else {
        eprintln!("Passwords do not match");
        None
    }
}

/// Uses the provided password or prompts for a new one
pub fn get_or_prompt_password(provided: Option<String>) -> Option<Password> {
    match provided {
        Some(pwd) if !pwd.is_empty() => Some(Password::new(pwd)),
        _ => confirm_password(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provided_password_offered_once() {
        let provider = PromptPassword::new(Some("secret".into()), false, ProgressBar::hidden());
        let first = provider.get_password(&PasswordQuery::new("a.7z", false)).await;
        assert_eq!(first.as_ref().map(Password::as_str), Some("secret"));

        let retry = provider.get_password(&PasswordQuery::new("a.7z", true)).await;
        assert!(retry.is_none());
    }

    #[tokio::test]
    async fn test_no_password_without_prompt() {
        let provider = PromptPassword::new(Some(String::new()), false, ProgressBar::hidden());
        assert!(provider.get_password(&PasswordQuery::new("a.7z", false)).await.is_none());
    }
}
