//! Text skeleton record: one line per joint per frame,
//! `timestamp_ms,joint_type,pos_x,pos_y,pos_z,orient_x,orient_y,orient_z,orient_w,tracking_state`.
//! Lines starting with `#` are comments.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::sensor::frame::{CameraSpacePoint, Joint, JointType, TrackingState, Vector4};
use crate::shared::constants::BODY_RECORD_FIELDS;

#[derive(Debug, Clone, PartialEq)]
pub struct JointRecord {
    pub timestamp_ms: f64,
    pub joint_type: JointType,
    pub position: CameraSpacePoint,
    pub orientation: Vector4,
    pub tracking_state: TrackingState,
}

pub fn format_line(timestamp_ms: f64, joint: &Joint) -> String {
    let p = joint.position;
    let o = joint.orientation;
    format!(
        "{:.3},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
        timestamp_ms,
        joint.joint_type.id(),
        p.x,
        p.y,
        p.z,
        o.x,
        o.y,
        o.z,
        o.w,
        joint.tracking_state.id()
    )
}

pub fn parse_line(line: &str) -> Result<JointRecord> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() != BODY_RECORD_FIELDS {
        bail!("expected {} fields, found {}", BODY_RECORD_FIELDS, fields.len());
    }
    let float = |i: usize| -> Result<f32> {
        fields[i]
            .parse::<f32>()
            .with_context(|| format!("field {} is not a number: {:?}", i, fields[i]))
    };
    let joint_id: u8 = fields[1].parse().with_context(|| format!("bad joint id {:?}", fields[1]))?;
    let state_id: u8 = fields[9].parse().with_context(|| format!("bad tracking state {:?}", fields[9]))?;
    Ok(JointRecord {
        timestamp_ms: fields[0]
            .parse()
            .with_context(|| format!("bad timestamp {:?}", fields[0]))?,
        joint_type: JointType::from_id(joint_id).ok_or_else(|| anyhow!("unknown joint id {}", joint_id))?,
        position: CameraSpacePoint {
            x: float(2)?,
            y: float(3)?,
            z: float(4)?,
        },
        orientation: Vector4 {
            x: float(5)?,
            y: float(6)?,
            z: float(7)?,
            w: float(8)?,
        },
        tracking_state: TrackingState::from_id(state_id)
            .ok_or_else(|| anyhow!("unknown tracking state {}", state_id))?,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyRecordSummary {
    pub lines: usize,
    /// Distinct timestamps, in file order.
    pub frames: usize,
    pub first_ms: Option<f64>,
    pub last_ms: Option<f64>,
    /// Indexed by `TrackingState::id()`.
    pub states: [usize; 3],
}

impl BodyRecordSummary {
    pub fn duration_ms(&self) -> f64 {
        match (self.first_ms, self.last_ms) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    pub fn fps(&self) -> f64 {
        let secs = self.duration_ms() / 1000.0;
        if self.frames > 1 && secs > 0.0 {
            (self.frames - 1) as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for BodyRecordSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lines:    {}", self.lines)?;
        writeln!(f, "frames:   {}", self.frames)?;
        writeln!(f, "duration: {:.3} s", self.duration_ms() / 1000.0)?;
        writeln!(f, "rate:     {:.2} fps", self.fps())?;
        write!(
            f,
            "joints:   {} tracked, {} inferred, {} not tracked",
            self.states[TrackingState::Tracked.id() as usize],
            self.states[TrackingState::Inferred.id() as usize],
            self.states[TrackingState::NotTracked.id() as usize]
        )
    }
}

pub fn read_body_record<R: BufRead>(reader: R) -> Result<BodyRecordSummary> {
    let mut summary = BodyRecordSummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read body record")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record = parse_line(trimmed).with_context(|| format!("line {}", index + 1))?;
        if summary.last_ms != Some(record.timestamp_ms) {
            summary.frames += 1;
        }
        summary.first_ms.get_or_insert(record.timestamp_ms);
        summary.last_ms = Some(record.timestamp_ms);
        summary.states[record.tracking_state.id() as usize] += 1;
        summary.lines += 1;
    }
    Ok(summary)
}

pub fn inspect(path: &Path) -> Result<BodyRecordSummary> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_body_record(BufReader::new(file))
}
