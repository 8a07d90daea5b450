use std::time::Duration;

use crate::shared::constants::{JOINT_COUNT, YUY2_BYTES_PER_PIXEL};

/// Skeleton landmarks in the order the sensor runtime enumerates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JointType {
    SpineBase = 0,
    SpineMid = 1,
    Neck = 2,
    Head = 3,
    ShoulderLeft = 4,
    ElbowLeft = 5,
    WristLeft = 6,
    HandLeft = 7,
    ShoulderRight = 8,
    ElbowRight = 9,
    WristRight = 10,
    HandRight = 11,
    HipLeft = 12,
    KneeLeft = 13,
    AnkleLeft = 14,
    FootLeft = 15,
    HipRight = 16,
    KneeRight = 17,
    AnkleRight = 18,
    FootRight = 19,
    SpineShoulder = 20,
    HandTipLeft = 21,
    ThumbLeft = 22,
    HandTipRight = 23,
    ThumbRight = 24,
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum TrackingState {
    #[default]
    NotTracked = 0,
    Inferred = 1,
    Tracked = 2,
}

impl TrackingState {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(TrackingState::NotTracked),
            1 => Some(TrackingState::Inferred),
            2 => Some(TrackingState::Tracked),
            _ => None,
        }
    }
}

/// Position in camera space, metres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraSpacePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Vector4 {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub joint_type: JointType,
    pub position: CameraSpacePoint,
    pub orientation: Vector4,
    pub tracking_state: TrackingState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub tracking_id: u64,
    pub is_tracked: bool,
    /// Indexed by `JointType::id()`.
    pub joints: [Joint; JOINT_COUNT],
}

impl Body {
    /// An untracked slot with every joint present but not tracked.
    pub fn untracked() -> Self {
        Self {
            tracking_id: 0,
            is_tracked: false,
            joints: JointType::ALL.map(|joint_type| Joint {
                joint_type,
                position: CameraSpacePoint::default(),
                orientation: Vector4::default(),
                tracking_state: TrackingState::NotTracked,
            }),
        }
    }

    pub fn joint(&self, joint_type: JointType) -> &Joint {
        &self.joints[joint_type.id() as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyFrame {
    pub relative_time: Duration,
    pub bodies: Vec<Body>,
}

impl BodyFrame {
    pub fn tracked_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_tracked).count()
    }

    /// First tracked body in runtime slot order.
    pub fn first_tracked(&self) -> Option<&Body> {
        self.bodies.iter().find(|b| b.is_tracked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuy2,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuy2 => YUY2_BYTES_PER_PIXEL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Yuy2 => "YUY2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub relative_time: Duration,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl ColorFrame {
    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }
}
