//! Wire vocabulary for the TennisGenius control protocol.
//!
//! Client → server: ASCII command lines, `\n`-terminated.
//! Server → client: `\n`-terminated status lines, or a 10-byte ASCII
//! decimal length header immediately followed by that many raw JPEG bytes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed server port on the rig's access point.
pub const DEFAULT_PORT: u16 = 8000;

/// Length of the ASCII decimal size header preceding an image payload.
pub const SIZE_HEADER_LEN: usize = 10;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Normal read timeout. Short so the reader loop can poll its cancellation
/// flag between blocking reads.
pub const READ_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Raised read timeout while an image transfer is in progress.
pub const IMAGE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Status line announcing that two image frames follow.
pub const CAPTURE_DONE_LINE: &str = "STATUS: CAPTURE_DONE; SENDING_IMAGES";

/// Camera settings attached to recording / capture commands.
///
/// Field names double as the `key=value` argument names on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    pub ae_lock: bool,
    pub awb_lock: bool,
    /// Exposure bounds in nanoseconds.
    pub exposure_low: u64,
    pub exposure_high: u64,
    pub gain: f32,
    pub digital_gain: f32,
    pub jpeg_quality: u8,
    /// Exposure compensation in EV, 0.25 steps.
    pub exp_comp: f32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            ae_lock: false,
            awb_lock: false,
            exposure_low: 10_000,
            exposure_high: 10_000,
            gain: 1.0,
            digital_gain: 1.0,
            jpeg_quality: 85,
            exp_comp: 0.0,
        }
    }
}

impl CameraParams {
    fn to_args(&self) -> String {
        format!(
            "ae_lock={},awb_lock={},exposure_low={},exposure_high={},gain={:.1},digital_gain={:.1},jpeg_quality={},exp_comp={:+.2}",
            self.ae_lock as u8,
            self.awb_lock as u8,
            self.exposure_low,
            self.exposure_high,
            self.gain,
            self.digital_gain,
            self.jpeg_quality,
            self.exp_comp,
        )
    }
}

/// Client → server commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartRecording(CameraParams),
    StopRecording,
    CapturePhoto(CameraParams),
    StartTracking,
    ShutdownSystem,
}

impl Command {
    /// Encode as a `\n`-terminated UTF-8 line.
    pub fn encode(&self) -> String {
        match self {
            Command::StartRecording(p) => format!("START_RECORDING:{}\n", p.to_args()),
            Command::StopRecording => "STOP_RECORDING\n".to_string(),
            Command::CapturePhoto(p) => format!("CAPTURE_PHOTO:{}\n", p.to_args()),
            Command::StartTracking => "START_TRACKING\n".to_string(),
            Command::ShutdownSystem => "SHUTDOWN_SYSTEM\n".to_string(),
        }
    }
}

/// Recording progress reported via `STATUS_FRAMES:`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frames_processed: u32,
    pub frames_written: u32,
    /// Free disk space in GB (the wire value divided by 1000).
    pub free_gb: f32,
}

/// A decoded server status line.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerLine {
    /// `SERVER_STOP:<reason>` — the server forced the recording to stop.
    ServerStop { reason: String },
    /// Capture finished; two image frames follow on the stream.
    CaptureDone,
    /// `STATUS_FRAMES:<processed>,<written>,<free>` recording progress.
    Frames(FrameStats),
    /// `STATUS_FRAMES:` line whose fields did not parse.
    MalformedFrames { raw: String },
    /// `STATUS:<text>` plain status.
    Status { text: String },
    /// Any other text, split into `label: text` on the first colon.
    Text { label: Option<String>, text: String },
}

/// Classify a status line received from the server.
pub fn parse_server_line(line: &str) -> ServerLine {
    if let Some(reason) = line.strip_prefix("SERVER_STOP:") {
        return ServerLine::ServerStop {
            reason: reason.trim().to_string(),
        };
    }
    if line == CAPTURE_DONE_LINE {
        return ServerLine::CaptureDone;
    }
    if let Some(data) = line.strip_prefix("STATUS_FRAMES:") {
        return parse_frame_stats(data.trim());
    }
    if let Some(status) = line.strip_prefix("STATUS:") {
        return ServerLine::Status {
            text: status.trim().to_string(),
        };
    }
    match line.split_once(':') {
        Some((label, text)) => ServerLine::Text {
            label: Some(label.to_string()),
            text: text.trim().to_string(),
        },
        None => ServerLine::Text {
            label: None,
            text: line.to_string(),
        },
    }
}

fn parse_frame_stats(data: &str) -> ServerLine {
    let parts: Vec<&str> = data.split(',').collect();
    if parts.len() != 3 {
        return ServerLine::MalformedFrames {
            raw: data.to_string(),
        };
    }
    let processed = parts[0].trim().parse::<u32>();
    let written = parts[1].trim().parse::<u32>();
    let free = parts[2].trim().parse::<f32>();
    match (processed, written, free) {
        (Ok(p), Ok(w), Ok(f)) => ServerLine::Frames(FrameStats {
            frames_processed: p,
            frames_written: w,
            free_gb: f / 1000.0,
        }),
        _ => ServerLine::MalformedFrames {
            raw: data.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_commands() {
        assert_eq!(Command::StopRecording.encode(), "STOP_RECORDING\n");
        assert_eq!(Command::StartTracking.encode(), "START_TRACKING\n");
        assert_eq!(Command::ShutdownSystem.encode(), "SHUTDOWN_SYSTEM\n");
    }

    #[test]
    fn test_encode_start_recording_args() {
        let line = Command::StartRecording(CameraParams::default()).encode();
        assert!(line.starts_with("START_RECORDING:"));
        assert!(line.ends_with('\n'));
        assert!(line.contains("ae_lock=0"));
        assert!(line.contains("exposure_low=10000"));
        assert!(line.contains("gain=1.0"));
        assert!(line.contains("jpeg_quality=85"));
        assert!(line.contains("exp_comp=+0.00"));
    }

    #[test]
    fn test_encode_capture_photo_respects_settings() {
        let params = CameraParams {
            ae_lock: true,
            jpeg_quality: 95,
            exp_comp: -0.25,
            ..CameraParams::default()
        };
        let line = Command::CapturePhoto(params).encode();
        assert!(line.starts_with("CAPTURE_PHOTO:"));
        assert!(line.contains("ae_lock=1"));
        assert!(line.contains("jpeg_quality=95"));
        assert!(line.contains("exp_comp=-0.25"));
    }

    #[test]
    fn test_parse_server_stop() {
        assert_eq!(
            parse_server_line("SERVER_STOP: disk failure"),
            ServerLine::ServerStop {
                reason: "disk failure".to_string()
            }
        );
    }

    #[test]
    fn test_parse_capture_done_is_exact_match() {
        assert_eq!(
            parse_server_line("STATUS: CAPTURE_DONE; SENDING_IMAGES"),
            ServerLine::CaptureDone
        );
        // Near misses fall through to the plain STATUS: branch.
        assert_eq!(
            parse_server_line("STATUS: CAPTURE_DONE"),
            ServerLine::Status {
                text: "CAPTURE_DONE".to_string()
            }
        );
    }

    #[test]
    fn test_parse_status_frames() {
        let line = parse_server_line("STATUS_FRAMES: 120, 118, 450000");
        match line {
            ServerLine::Frames(stats) => {
                assert_eq!(stats.frames_processed, 120);
                assert_eq!(stats.frames_written, 118);
                assert!((stats.free_gb - 450.0).abs() < 1e-3);
            }
            other => panic!("expected Frames, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_status_frames_malformed() {
        assert!(matches!(
            parse_server_line("STATUS_FRAMES: a, b, c"),
            ServerLine::MalformedFrames { .. }
        ));
        assert!(matches!(
            parse_server_line("STATUS_FRAMES: 1, 2"),
            ServerLine::MalformedFrames { .. }
        ));
    }

    #[test]
    fn test_parse_plain_status() {
        assert_eq!(
            parse_server_line("STATUS: Recording started"),
            ServerLine::Status {
                text: "Recording started".to_string()
            }
        );
    }

    #[test]
    fn test_parse_free_text() {
        assert_eq!(
            parse_server_line("BATTERY: 73%"),
            ServerLine::Text {
                label: Some("BATTERY".to_string()),
                text: "73%".to_string()
            }
        );
        assert_eq!(
            parse_server_line("hello"),
            ServerLine::Text {
                label: None,
                text: "hello".to_string()
            }
        );
    }
}
