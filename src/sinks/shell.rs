//! Shell sink - carries out actions by running configured shell commands
//!
//! Each built-in action maps to a command template from the `actions`
//! section of the config. `set_volume` substitutes `{value}`. Command-table
//! payloads run as-is. Status queries read `volume_status` (an integer on
//! stdout) and `mute_status` (`true` on stdout means muted).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::action::{Action, ActionSink, HostStatus};
use crate::error::ActionError;

/// Command templates for built-in actions
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShellActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_pause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toggle_mute: Option<String>,
    /// Template with a `{value}` placeholder (0-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mute_status: Option<String>,
}

pub struct ShellSink {
    actions: ShellActions,
}

impl ShellSink {
    pub fn new(actions: ShellActions) -> Self {
        Self { actions }
    }

    /// Resolve the shell command line for an action
    pub fn command_for(&self, action: &Action) -> Result<String, ActionError> {
        let template = match action {
            Action::Command(cmd) => return Ok(cmd.clone()),
            Action::SetVolume(value) => {
                return self
                    .actions
                    .set_volume
                    .as_ref()
                    .map(|t| t.replace("{value}", &value.to_string()))
                    .ok_or_else(|| ActionError::Unsupported(action.id().to_string()))
            }
            Action::PreviousTrack => &self.actions.previous_track,
            Action::PlayPause => &self.actions.play_pause,
            Action::NextTrack => &self.actions.next_track,
            Action::ToggleMute => &self.actions.toggle_mute,
        };

        template
            .clone()
            .ok_or_else(|| ActionError::Unsupported(action.id().to_string()))
    }
}

#[async_trait]
impl ActionSink for ShellSink {
    fn name(&self) -> &str {
        "shell"
    }

    async fn invoke(&self, action: &Action) -> Result<(), ActionError> {
        let cmd = self.command_for(action)?;
        run_shell(action.id(), &cmd).await?;
        Ok(())
    }

    async fn status(&self) -> Result<HostStatus, ActionError> {
        let volume_cmd = self
            .actions
            .volume_status
            .as_ref()
            .ok_or_else(|| ActionError::Unsupported("volume_status".to_string()))?;

        let raw = run_shell("volume_status", volume_cmd).await?;
        let volume = raw
            .trim()
            .parse::<i64>()
            .map_err(|e| ActionError::Failed {
                action: "volume_status".to_string(),
                reason: format!("unexpected output {:?}: {}", raw.trim(), e),
            })?
            .clamp(0, 100) as u8;

        let mute = match &self.actions.mute_status {
            Some(cmd) => run_shell("mute_status", cmd).await?.trim() == "true",
            None => false,
        };

        debug!("Current host status - Volume: {}, Mute: {}", volume, mute);
        Ok(HostStatus { volume, mute })
    }
}

/// Run a command line through the platform shell, returning stdout
async fn run_shell(action: &str, cmd: &str) -> Result<String, ActionError> {
    trace!("Running {}: {}", action, cmd);

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    let output = command.kill_on_drop(true).output().await?;
    if !output.status.success() {
        return Err(ActionError::Failed {
            action: action.to_string(),
            reason: format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions() -> ShellActions {
        ShellActions {
            next_track: Some("true".to_string()),
            set_volume: Some("test {value} -le 100".to_string()),
            volume_status: Some("echo 42".to_string()),
            mute_status: Some("echo true".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_command_templates() {
        let sink = ShellSink::new(actions());

        assert_eq!(
            sink.command_for(&Action::SetVolume(30)).unwrap(),
            "test 30 -le 100"
        );
        assert_eq!(
            sink.command_for(&Action::Command("echo hi".into())).unwrap(),
            "echo hi"
        );
        assert!(matches!(
            sink.command_for(&Action::PlayPause),
            Err(ActionError::Unsupported(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_and_status() {
        let sink = ShellSink::new(actions());

        sink.invoke(&Action::NextTrack).await.unwrap();
        sink.invoke(&Action::SetVolume(77)).await.unwrap();
        assert_eq!(
            sink.status().await.unwrap(),
            HostStatus {
                volume: 42,
                mute: true
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let sink = ShellSink::new(actions());

        let err = sink
            .invoke(&Action::Command("exit 3".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_status_unsupported_without_template() {
        let sink = ShellSink::new(ShellActions::default());
        assert!(matches!(
            sink.status().await,
            Err(ActionError::Unsupported(_))
        ));
    }
}
