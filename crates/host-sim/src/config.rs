//! Simulation settings loaded from the environment.
use std::env;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// Number of frames to run.
    pub frames: u64,
    /// Simulated time between two frames.
    pub frame_interval: Duration,
    pub party_size: usize,
    /// Action id rejected by the demo interceptor, if any.
    pub block_action: Option<u32>,
    /// Sleep between frames instead of running as fast as possible.
    pub realtime: bool,
    pub session_id: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            frame_interval: Duration::from_millis(16),
            party_size: 4,
            block_action: None,
            realtime: false,
            session_id: None,
        }
    }
}

impl SimConfig {
    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `SIM_FRAMES` - Frames to simulate (default: 600)
    /// - `SIM_FRAME_MS` - Milliseconds per frame (default: 16)
    /// - `SIM_PARTY_SIZE` - Party members (default: 4)
    /// - `SIM_BLOCK_ACTION` - Action id the demo interceptor prevents (default: none)
    /// - `SIM_REALTIME` - Pace frames with the wall clock (default: false)
    /// - `GAME_SESSION_ID` - Log session directory name (default: timestamp)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(frames) = read_env::<u64>("SIM_FRAMES") {
            config.frames = frames;
        }
        if let Some(ms) = read_env::<u64>("SIM_FRAME_MS") {
            config.frame_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(size) = read_env::<usize>("SIM_PARTY_SIZE") {
            config.party_size = size.clamp(1, 8);
        }
        config.block_action = read_env::<u32>("SIM_BLOCK_ACTION");
        if let Some(realtime) = read_env::<bool>("SIM_REALTIME") {
            config.realtime = realtime;
        }
        config.session_id = env::var("GAME_SESSION_ID").ok();

        config
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok().and_then(|value| value.parse().ok())
}
