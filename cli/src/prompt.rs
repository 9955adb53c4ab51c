//! Terminal prompt for join requests.

use std::io::{self, BufRead, Write};
use std::net::IpAddr;

use async_trait::async_trait;
use clipmesh_core::auth::JoinApprover;
use tokio::sync::Mutex;

/// Asks on stdin whether an unknown device may join.
#[derive(Default)]
pub struct PromptApprover {
    // One question on the terminal at a time
    asking: Mutex<()>,
}

impl PromptApprover {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JoinApprover for PromptApprover {
    async fn approve(&self, address: IpAddr, port: u16) -> bool {
        let _turn = self.asking.lock().await;
        let question = format!(
            "\x1b[1;35m⚡\x1b[0m Allow \x1b[1m{}:{}\x1b[0m to join the group? [y/N] ",
            address, port
        );

        tokio::task::spawn_blocking(move || {
            print!("{}", question);
            let _ = io::stdout().flush();

            let mut answer = String::new();
            match io::stdin().lock().read_line(&mut answer) {
                Ok(_) => is_yes(&answer),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("nope"));
    }
}
