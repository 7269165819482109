//! Stdin sensor feed.
//!
//! One JSON object per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"vision","source":"traffic_light","detections":[{"class_index":1,"confidence":0.91}]}
//! {"kind":"range","distance_cm":142.5}
//! {"kind":"range_timeout"}
//! {"kind":"motion","accel":[0.0,0.0,1.0],"gyro":[0.0,0.0,0.0]}
//! {"kind":"motion_error"}
//! {"kind":"cancel"}
//! ```

use anyhow::Result;
use nalgebra::Vector3;
use navguard_core::runtime::{MotionInput, RangeInput};
use navguard_core::{ModelOutput, MotionSample, NavInputs, RawDetection, VisionSource};
use navguard_env::NavContext;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// One line of sensor input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputLine {
    Vision {
        source: VisionSource,
        #[serde(default)]
        detections: Vec<RawDetection>,
    },
    Range {
        distance_cm: f32,
    },
    RangeTimeout,
    Motion {
        accel: [f64; 3],
        gyro: [f64; 3],
    },
    MotionError,
    Cancel,
}

/// Reads input lines until EOF and routes each to the agent, stamped with the
/// context clock on arrival. Malformed lines are logged and skipped.
///
/// Returns the number of lines routed.
pub async fn pump<Ctx, R>(context: &Ctx, reader: R, inputs: &NavInputs<Ctx>) -> Result<u64>
where
    Ctx: NavContext,
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut routed = 0;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed: InputLine = match serde_json::from_str(trimmed) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping malformed input line: {} ({})", trimmed, e);
                continue;
            }
        };

        if !route(context, parsed, inputs).await {
            debug!("Agent stopped; input no longer routed");
            break;
        }
        routed += 1;
    }

    Ok(routed)
}

/// Forwards one line. Returns false once the agent has shut down.
async fn route<Ctx: NavContext>(context: &Ctx, line: InputLine, inputs: &NavInputs<Ctx>) -> bool {
    let at = context.now();
    match line {
        InputLine::Vision { source, detections } => inputs
            .vision
            .send(ModelOutput { source, detections, timestamp: at })
            .await
            .is_ok(),
        InputLine::Range { distance_cm } => inputs
            .range
            .send(RangeInput::Reading { distance_cm, at })
            .await
            .is_ok(),
        InputLine::RangeTimeout => inputs.range.send(RangeInput::Timeout { at }).await.is_ok(),
        InputLine::Motion { accel, gyro } => {
            let sample = MotionSample::new(Vector3::from(accel), Vector3::from(gyro), at);
            inputs.motion.send(MotionInput::Sample(sample)).await.is_ok()
        }
        InputLine::MotionError => inputs.motion.send(MotionInput::BusError { at }).await.is_ok(),
        InputLine::Cancel => {
            inputs.cancel.press();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_every_kind() {
        let vision: InputLine = serde_json::from_str(
            r#"{"kind":"vision","source":"pedestrian_signal","detections":[{"class_index":2,"confidence":0.9}]}"#,
        )
        .unwrap();
        assert_eq!(
            vision,
            InputLine::Vision {
                source: VisionSource::PedestrianSignal,
                detections: vec![RawDetection { class_index: 2, confidence: 0.9, bbox: None }],
            }
        );

        let range: InputLine = serde_json::from_str(r#"{"kind":"range","distance_cm":42.0}"#).unwrap();
        assert_eq!(range, InputLine::Range { distance_cm: 42.0 });

        let motion: InputLine =
            serde_json::from_str(r#"{"kind":"motion","accel":[0,0,1],"gyro":[0,0,0]}"#).unwrap();
        assert_eq!(motion, InputLine::Motion { accel: [0.0, 0.0, 1.0], gyro: [0.0; 3] });

        for (text, expected) in [
            (r#"{"kind":"range_timeout"}"#, InputLine::RangeTimeout),
            (r#"{"kind":"motion_error"}"#, InputLine::MotionError),
            (r#"{"kind":"cancel"}"#, InputLine::Cancel),
        ] {
            assert_eq!(serde_json::from_str::<InputLine>(text).unwrap(), expected);
        }
    }

    #[test]
    fn test_vision_without_detections_is_empty_frame() {
        let line: InputLine = serde_json::from_str(r#"{"kind":"vision","source":"surroundings"}"#).unwrap();
        assert_eq!(
            line,
            InputLine::Vision { source: VisionSource::Surroundings, detections: vec![] }
        );
    }

    #[test]
    fn test_rejects_unknown_kind() {
        assert!(serde_json::from_str::<InputLine>(r#"{"kind":"teleport"}"#).is_err());
        assert!(serde_json::from_str::<InputLine>(r#"{"kind":"vision","source":"radar"}"#).is_err());
    }
}
