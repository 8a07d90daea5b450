pub const APP_NAME: &str = "skelcap";

pub const CONFIG_FILE: &str = "skelcap.json";
pub const ERROR_LOG_FILE: &str = "error.log";
pub const DEBUG_LOG_FILE: &str = "debug.log";

pub const BODY_RECORD_EXTENSION: &str = "body.csv";
pub const COLOR_RECORD_EXTENSION: &str = "color.yuy2";

/// Body slots reported per frame by the sensor runtime.
pub const BODY_COUNT: usize = 6;
pub const JOINT_COUNT: usize = 25;

pub const DEFAULT_BODY_FPS: f64 = 30.0;
pub const DEFAULT_COLOR_FPS: f64 = 30.0;
pub const DEFAULT_COLOR_WIDTH: u32 = 1920;
pub const DEFAULT_COLOR_HEIGHT: u32 = 1080;
/// YUY2 packs two pixels into four bytes.
pub const YUY2_BYTES_PER_PIXEL: usize = 2;

pub const DEFAULT_BUFFER_POOL: usize = 4;
pub const STATUS_PERIOD_MS: u64 = 1000;
pub const RATE_WINDOW_MS: u64 = 1000;

pub const BODY_RECORD_HEADER: &str = "# timestamp_ms,joint_type,pos_x,pos_y,pos_z,orient_x,orient_y,orient_z,orient_w,tracking_state";
pub const BODY_RECORD_FIELDS: usize = 10;
