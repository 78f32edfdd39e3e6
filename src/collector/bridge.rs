/**
 * ============================================================================
 * SESSION BRIDGE MODULE
 * ============================================================================
 *
 * PURPOSE: Translate between device app messages and controller events
 *
 * INBOUND (device -> controller):
 * - {"dataKey": <int>, "dataLine": "<csv>"}  -> Enqueue
 * - {"settingsChanged": true}                -> SettingsChanged
 * - {"resend": true}                         -> Resend
 *
 * OUTBOUND (controller -> device):
 * - UploadStart          -> {"uploadStart": <key>}
 * - UploadDone           -> {"uploadDone": <key>}
 * - UploadFailed         -> {"uploadFailed": "<reason>"}
 * - ConfigurationMissing -> {"modalMessage": "Not configured"}
 * - ResumeState          -> {"lastSent": <key>, "uploadStart": <head key>?}
 *
 * Messages travel as one JSON object per line.
 *
 * ============================================================================
 */

use crate::collector::config::NOT_CONFIGURED_MESSAGE;
use crate::collector::manager::ControllerHandle;
use crate::collector::queue::ITEM_SEPARATOR;
use crate::collector::types::{Notification, RecordKey};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/**
 * Message received from the device session
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMessage {
    #[serde(default)]
    pub data_key: Option<RecordKey>,
    #[serde(default)]
    pub data_line: Option<String>,
    #[serde(default)]
    pub settings_changed: bool,
    #[serde(default)]
    pub resend: bool,
}

/**
 * Message sent to the device session
 * Only the fields relevant to the notification are present
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_start: Option<RecordKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_done: Option<RecordKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modal_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sent: Option<RecordKey>,
}

impl From<&Notification> for OutboundMessage {
    fn from(notification: &Notification) -> Self {
        match notification {
            Notification::UploadStart { key } => OutboundMessage {
                upload_start: Some(*key),
                ..Default::default()
            },
            Notification::UploadDone { key } => OutboundMessage {
                upload_done: Some(*key),
                ..Default::default()
            },
            Notification::UploadFailed { reason } => OutboundMessage {
                upload_failed: Some(reason.clone()),
                ..Default::default()
            },
            Notification::ConfigurationMissing => OutboundMessage {
                modal_message: Some(NOT_CONFIGURED_MESSAGE.to_string()),
                ..Default::default()
            },
            Notification::ResumeState {
                last_sent,
                pending_start,
            } => OutboundMessage {
                last_sent: Some(*last_sent),
                upload_start: *pending_start,
                ..Default::default()
            },
        }
    }
}

/**
 * Check that a record line can be stored without corrupting the queue encoding
 */
pub fn is_storable_line(line: &str) -> bool {
    !line.contains(ITEM_SEPARATOR) && !line.contains(['\r', '\n'])
}

/**
 * Bridge from the device session to the queue controller
 */
#[derive(Debug, Clone)]
pub struct SessionBridge {
    controller: ControllerHandle,
}

impl SessionBridge {
    pub fn new(controller: ControllerHandle) -> Self {
        Self { controller }
    }

    /**
     * Route one app message
     * Records need a non-zero key and a non-empty line; anything else is ignored
     */
    pub fn handle_app_message(&self, message: AppMessage) -> Result<(), String> {
        if message.resend {
            log::info!("Resend requested by device session");
            self.controller.resend()?;
        }

        if message.settings_changed {
            log::info!("Settings change signalled");
            self.controller.settings_changed()?;
        }

        match (message.data_key, message.data_line) {
            (Some(key), Some(line)) if key != 0 && !line.is_empty() => {
                if !is_storable_line(&line) {
                    log::warn!("Dropping record {} with reserved characters: {:?}", key, line);
                    return Ok(());
                }
                self.controller.enqueue(key, line)
            }
            _ => Ok(()),
        }
    }

    /**
     * Parse and route one JSON line
     * Blank lines are ignored
     */
    pub fn handle_line(&self, text: &str) -> Result<(), String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let message: AppMessage = serde_json::from_str(text)
            .map_err(|e| format!("Failed to parse app message: {}", e))?;
        self.handle_app_message(message)
    }

    /**
     * Read app messages until EOF
     * Malformed lines are logged and skipped
     */
    pub async fn read_messages<R>(&self, reader: R) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| format!("Failed to read device link: {}", e))?
        {
            if let Err(e) = self.handle_line(&line) {
                log::warn!("{}", e);
            }
        }

        log::info!("Device link closed");
        Ok(())
    }
}

/**
 * Write every notification as a JSON line until the channel closes
 */
pub async fn forward_notifications<W>(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    mut writer: W,
) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    while let Some(notification) = notifications.recv().await {
        let message = OutboundMessage::from(&notification);
        let mut json = serde_json::to_string(&message)
            .map_err(|e| format!("Failed to serialize app message: {}", e))?;
        json.push('\n');

        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| format!("Failed to write app message: {}", e))?;
        writer
            .flush()
            .await
            .map_err(|e| format!("Failed to flush app message: {}", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::manager::ControllerEvent;

    fn bridge() -> (SessionBridge, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionBridge::new(ControllerHandle::from_sender(tx)), rx)
    }

    #[test]
    fn test_outbound_message_shapes() {
        let cases = [
            (Notification::UploadStart { key: 5 }, r#"{"uploadStart":5}"#),
            (Notification::UploadDone { key: 6 }, r#"{"uploadDone":6}"#),
            (
                Notification::UploadFailed {
                    reason: "Network Error".to_string(),
                },
                r#"{"uploadFailed":"Network Error"}"#,
            ),
            (
                Notification::ConfigurationMissing,
                r#"{"modalMessage":"Not configured"}"#,
            ),
            (
                Notification::ResumeState {
                    last_sent: 9,
                    pending_start: Some(3),
                },
                r#"{"uploadStart":3,"lastSent":9}"#,
            ),
            (
                Notification::ResumeState {
                    last_sent: 0,
                    pending_start: None,
                },
                r#"{"lastSent":0}"#,
            ),
        ];

        for (notification, expected) in cases {
            let json = serde_json::to_string(&OutboundMessage::from(&notification)).unwrap();
            assert_eq!(json, expected);
        }
    }

    #[test]
    fn test_record_message_enqueues() {
        let (bridge, mut rx) = bridge();
        bridge
            .handle_line(r#"{"dataKey": 1484867400, "dataLine": "1484867400,1,2,3,4,5,6,7"}"#)
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            ControllerEvent::Enqueue {
                key: 1484867400,
                line: "1484867400,1,2,3,4,5,6,7".to_string()
            }
        );
    }

    #[test]
    fn test_incomplete_or_reserved_records_ignored() {
        let (bridge, mut rx) = bridge();
        bridge.handle_line(r#"{"dataKey": 0, "dataLine": "x"}"#).unwrap();
        bridge.handle_line(r#"{"dataKey": 5, "dataLine": ""}"#).unwrap();
        bridge.handle_line(r#"{"dataLine": "x"}"#).unwrap();
        bridge.handle_line(r#"{"dataKey": 5, "dataLine": "a|b"}"#).unwrap();
        bridge.handle_line("   ").unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_commands_routed() {
        let (bridge, mut rx) = bridge();
        bridge.handle_line(r#"{"settingsChanged": true}"#).unwrap();
        bridge.handle_line(r#"{"resend": true}"#).unwrap();

        assert_eq!(rx.try_recv().unwrap(), ControllerEvent::SettingsChanged);
        assert_eq!(rx.try_recv().unwrap(), ControllerEvent::Resend);
    }

    #[test]
    fn test_malformed_line_is_error() {
        let (bridge, _rx) = bridge();
        let err = bridge.handle_line("{oops").unwrap_err();
        assert!(err.starts_with("Failed to parse app message"));
    }

    #[test]
    fn test_storable_line() {
        assert!(is_storable_line("1,2,3;4"));
        assert!(!is_storable_line("1|2"));
        assert!(!is_storable_line("1\n2"));
    }

    #[tokio::test]
    async fn test_read_messages_until_eof() {
        let (bridge, mut rx) = bridge();
        let input = b"{\"dataKey\":1,\"dataLine\":\"1,0\"}\nnot json\n{\"dataKey\":2,\"dataLine\":\"2,0\"}\n";

        bridge.read_messages(&input[..]).await.unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ControllerEvent::Enqueue { key: 1, .. }));
        assert!(matches!(rx.try_recv().unwrap(), ControllerEvent::Enqueue { key: 2, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_notifications_writes_json_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Notification::UploadStart { key: 1 }).unwrap();
        tx.send(Notification::UploadDone { key: 1 }).unwrap();
        drop(tx);

        let mut output = Vec::new();
        forward_notifications(rx, &mut output).await.unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "{\"uploadStart\":1}\n{\"uploadDone\":1}\n"
        );
    }
}
