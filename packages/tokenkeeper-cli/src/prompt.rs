//! Terminal rendering of login progress.
//!
//! Everything goes to stderr so that `tokenkeeper token` can be piped.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokenkeeper_core::{AuthError, DeviceAuthorization, LoginEvent, LoginObserver};
use tokio_util::sync::CancellationToken;

use crate::OutputFormat;

pub struct TerminalObserver {
    format: OutputFormat,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalObserver {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            spinner: Mutex::new(None),
        }
    }

    fn start_spinner(&self, message: &'static str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut slot) = self.spinner.lock() {
            *slot = Some(spinner);
        }
    }

    fn stop_spinner(&self) {
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(spinner) = slot.take() {
                spinner.finish_and_clear();
            }
        }
    }

    fn render_text(&self, event: &LoginEvent) {
        match event {
            LoginEvent::ReauthorizationRequired { .. } => {
                eprintln!("Please sign in to re-authorize the CLI.");
            }
            LoginEvent::RefreshFailed { reason, .. } => {
                eprintln!("Failed to renew access token: {}", reason);
            }
            LoginEvent::DeviceCode { user_code, .. } => {
                eprintln!("Your Device Confirmation code is: {}\n", user_code);
            }
            LoginEvent::BrowserOpenFailed { url, .. } => {
                eprintln!("Couldn't open the URL, please do it manually: {}", url);
            }
            LoginEvent::WaitingForBrowser => {
                self.start_spinner("Waiting for login to complete in browser");
            }
            LoginEvent::WaitFinished { .. } => self.stop_spinner(),
            LoginEvent::LoggedIn { .. } => {
                eprintln!("\nSuccessfully logged in.\n");
            }
            LoginEvent::RefreshTokenNotStored { .. } => {
                eprintln!(
                    "Could not store the refresh token locally, please expect to log in again once your access token expires."
                );
            }
        }
    }

    fn render_json(&self, event: &LoginEvent) {
        let line = match event {
            LoginEvent::DeviceCode {
                user_code,
                verification_uri,
            } => serde_json::json!({
                "status": "awaiting_authorization",
                "verification_url": verification_uri,
                "user_code": user_code,
            }),
            LoginEvent::RefreshFailed { system, reason } => serde_json::json!({
                "warning": "refresh_failed",
                "system": system,
                "reason": reason,
            }),
            LoginEvent::BrowserOpenFailed { url, reason } => serde_json::json!({
                "warning": "browser_open_failed",
                "url": url,
                "reason": reason,
            }),
            LoginEvent::RefreshTokenNotStored { reason } => serde_json::json!({
                "warning": "refresh_token_not_stored",
                "reason": reason,
            }),
            _ => return,
        };
        eprintln!("{}", line);
    }
}

#[async_trait]
impl LoginObserver for TerminalObserver {
    fn on_event(&self, event: &LoginEvent) {
        match self.format {
            OutputFormat::Text => self.render_text(event),
            OutputFormat::Json => self.render_json(event),
        }
    }

    async fn confirm(&self, ctx: &CancellationToken, _auth: &DeviceAuthorization) -> Result<(), AuthError> {
        if matches!(self.format, OutputFormat::Json) {
            return Ok(());
        }

        eprintln!("Press Enter to open the browser to log in or ^C to quit...");
        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        });

        tokio::select! {
            _ = ctx.cancelled() => Err(AuthError::Cancelled),
            res = read => {
                if let Ok(Err(e)) = res {
                    tracing::debug!("Could not read confirmation from stdin: {}", e);
                }
                Ok(())
            }
        }
    }
}
