use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};

use crate::frame::Frame;
use crate::ring_buffer::RingBuffer;

/// how many recent sequence numbers / timestamps are kept per session
const RECENT_WINDOW: usize = 10;

/// A previous timestamp with this value carries no ordering information, so no
///  out-of-order decision is made against it.
const TIMESTAMP_WRAP_SENTINEL: u32 = u32::MAX;

/// Largest legitimate forward timestamp step between two consecutive frames,
///  in clock ticks - one minute at the 90 kHz video clock. Anything further
///  "ahead" than this is really a step backwards that wrapped, and anything
///  behind by less than the wrap allowance is a reorder.
const MAX_EXPECTED_TIMESTAMP_GAP: u32 = 90_000 * 60;

/// Playback statistics of a single session, from SETUP to TEARDOWN. Mutated
///  through [`SessionStatistics`] while the session is current, immutable once
///  it is finalized.
#[derive(Debug, Clone)]
pub struct SessionStat {
    pub session_id: String,
    pub media_name: String,
    pub start_time: SystemTime,
    /// unset until the session is torn down
    pub end_time: Option<SystemTime>,
    pub request_count: u32,
    pub frames_played: u64,
    pub frames_lost: u64,
    pub frames_out_of_order: u64,
    /// accumulated time spent in the playing sub-state
    pub playback_ms: u64,
}

impl SessionStat {
    fn new(session_id: String, media_name: String) -> SessionStat {
        SessionStat {
            session_id,
            media_name,
            start_time: SystemTime::now(),
            end_time: None,
            request_count: 0,
            frames_played: 0,
            frames_lost: 0,
            frames_out_of_order: 0,
            playback_ms: 0,
        }
    }

    /// frames per second of playback time, 0.0 if nothing was ever played
    pub fn average_frame_rate(&self) -> f64 {
        if self.playback_ms == 0 {
            return 0.0;
        }
        self.frames_played as f64 / (self.playback_ms as f64 / 1000.0)
    }

    pub fn wall_clock_duration(&self) -> Option<Duration> {
        self.end_time?
            .duration_since(self.start_time)
            .ok()
    }
}

/// Per-connection statistics engine: the append-only history of finalized
///  sessions plus the current (possibly still open) session with its
///  out-of-order detection windows.
///
/// The handle is cheap to clone; the receive task records frames through its
///  own clone while control operations drive the session lifecycle.
#[derive(Clone)]
pub struct SessionStatistics {
    inner: Arc<Mutex<StatsInner>>,
}

struct StatsInner {
    playback_tick: Duration,
    finalized: Vec<SessionStat>,
    current: Option<CurrentSession>,
}

struct CurrentSession {
    stat: SessionStat,
    recent_seqs: RingBuffer<u16>,
    recent_timestamps: RingBuffer<u32>,
    /// accrual is gated on this flag (under the lock) rather than on task
    ///  cancellation alone, so no playback time accrues after `pause_playback`
    ///  or `end_session` returns even if a final tick is already running
    accruing: bool,
    accrual_handle: Option<JoinHandle<()>>,
}

impl SessionStatistics {
    pub fn new(playback_tick: Duration) -> SessionStatistics {
        SessionStatistics {
            inner: Arc::new(Mutex::new(StatsInner {
                playback_tick,
                finalized: Vec::new(),
                current: None,
            })),
        }
    }

    /// Opens a new current session. The recent-frame windows start empty -
    ///  ordering state never leaks from a previous session.
    pub fn begin_session(&self, session_id: &str, media_name: &str) {
        let stale_handle = {
            let mut locked = self.inner.lock().unwrap();

            let stale_handle = match locked.current.take() {
                Some(stale) => {
                    warn!("beginning session {} while {} is still open - finalizing the old one", session_id, stale.stat.session_id);
                    Some(Self::finalize(&mut locked, stale))
                }
                None => None,
            };

            locked.current = Some(CurrentSession {
                stat: SessionStat::new(session_id.to_string(), media_name.to_string()),
                recent_seqs: RingBuffer::new(RECENT_WINDOW),
                recent_timestamps: RingBuffer::new(RECENT_WINDOW),
                accruing: false,
                accrual_handle: None,
            });
            stale_handle
        };

        if let Some(Some(handle)) = stale_handle {
            handle.abort();
        }
    }

    /// Finalizes the current session: stamps the end time, stops accrual and
    ///  moves it to the immutable history.
    pub fn end_session(&self) {
        let stale_handle = {
            let mut locked = self.inner.lock().unwrap();
            match locked.current.take() {
                Some(current) => Self::finalize(&mut locked, current),
                None => {
                    debug!("end_session without a current session");
                    return;
                }
            }
        };

        if let Some(handle) = stale_handle {
            handle.abort();
        }
    }

    /// stamps the end time and appends to the history; the caller aborts the
    ///  returned accrual handle outside the lock
    fn finalize(locked: &mut StatsInner, mut current: CurrentSession) -> Option<JoinHandle<()>> {
        current.accruing = false;
        current.stat.end_time = Some(SystemTime::now());
        locked.finalized.push(current.stat);
        current.accrual_handle.take()
    }

    /// Starts playback-time accrual. Must be called from within a tokio
    ///  runtime (the accrual tick is a spawned task).
    pub fn begin_playback(&self) {
        let mut locked = self.inner.lock().unwrap();
        let playback_tick = locked.playback_tick;

        let Some(current) = locked.current.as_mut() else {
            debug!("begin_playback without a current session");
            return;
        };
        if current.accruing {
            return;
        }

        current.accruing = true;
        current.accrual_handle = Some(tokio::spawn(Self::accrual_loop(self.inner.clone(), playback_tick)));
    }

    /// Stops playback-time accrual. When this returns, `playback_ms` does not
    ///  increase any more.
    pub fn pause_playback(&self) {
        let stale_handle = {
            let mut locked = self.inner.lock().unwrap();
            let Some(current) = locked.current.as_mut() else {
                return;
            };
            current.accruing = false;
            current.accrual_handle.take()
        };

        if let Some(handle) = stale_handle {
            handle.abort();
        }
    }

    /// Records the final control-request tally, called at teardown time.
    pub fn set_request_count(&self, count: u32) {
        if let Some(current) = self.inner.lock().unwrap().current.as_mut() {
            current.stat.request_count = count;
        }
    }

    /// Records one received frame: bumps the play counter, pushes sequence
    ///  number and timestamp into their windows and runs out-of-order
    ///  detection on the two most recent timestamps.
    ///
    /// Loss detection is an explicit extension point: a gap detector would
    ///  consume the `recent_seqs` window and bump `frames_lost`, but no
    ///  expected-sequence model is implemented here.
    pub fn record_frame(&self, frame: &Frame) {
        let mut locked = self.inner.lock().unwrap();
        let Some(current) = locked.current.as_mut() else {
            debug!("frame received without a current session - not recorded");
            return;
        };

        current.stat.frames_played += 1;
        current.recent_seqs.push(frame.sequence_number);
        current.recent_timestamps.push(frame.timestamp);

        let timestamps = current.recent_timestamps.snapshot();
        if let [.., prev, cur] = timestamps[..] {
            if is_out_of_order(prev, cur) {
                debug!("frame #{} with timestamp {} is out of order (previous timestamp {})", frame.sequence_number, cur, prev);
                current.stat.frames_out_of_order += 1;
            }
        }
    }

    /// Human-readable summary of every finalized session.
    pub fn report(&self) -> String {
        let locked = self.inner.lock().unwrap();

        let mut out = String::new();
        let _ = writeln!(out, "===== {} finalized session(s) =====", locked.finalized.len());
        for stat in &locked.finalized {
            let _ = writeln!(out, "session {} ({})", stat.session_id, stat.media_name);
            let _ = writeln!(out, "  control requests:    {}", stat.request_count);
            let _ = writeln!(out, "  frames played:       {}", stat.frames_played);
            let _ = writeln!(out, "  frames out of order: {}", stat.frames_out_of_order);
            let _ = writeln!(out, "  frames lost:         {}", stat.frames_lost);
            let _ = writeln!(out, "  playback time:       {:.3}s", stat.playback_ms as f64 / 1000.0);
            match stat.wall_clock_duration() {
                Some(wall) => {
                    let _ = writeln!(out, "  session duration:    {:.3}s", wall.as_secs_f64());
                }
                None => {
                    let _ = writeln!(out, "  session duration:    unknown");
                }
            }
            let _ = writeln!(out, "  average frame rate:  {:.2} fps", stat.average_frame_rate());
        }
        if let Some(current) = &locked.current {
            let _ = writeln!(out, "(session {} still open)", current.stat.session_id);
        }
        out
    }

    /// snapshot of the current session's counters, if a session is open
    pub fn current_session(&self) -> Option<SessionStat> {
        self.inner.lock().unwrap()
            .current.as_ref()
            .map(|c| c.stat.clone())
    }

    pub fn finalized_sessions(&self) -> Vec<SessionStat> {
        self.inner.lock().unwrap()
            .finalized.clone()
    }

    async fn accrual_loop(inner: Arc<Mutex<StatsInner>>, tick: Duration) {
        let mut ticks = interval(tick);
        let mut last = Instant::now();

        loop {
            ticks.tick().await;

            let now = Instant::now();
            let elapsed = now - last;
            last = now;

            let mut locked = inner.lock().unwrap();
            if let Some(current) = locked.current.as_mut() {
                if current.accruing {
                    current.stat.playback_ms += elapsed.as_millis() as u64;
                }
            }
        }
    }
}

/// Wraparound-aware ordering check on two consecutive presentation timestamps.
///
/// `behind` is the distance from `cur` back to `prev` modulo 2^32: small for a
///  genuine reorder, and within [`MAX_EXPECTED_TIMESTAMP_GAP`] of the full
///  range for a legitimate forward step (including one that wrapped past
///  2^32). The gap bound keeps large but legitimate jumps - clock-rate
///  dependent silence or skip periods - from being flagged.
fn is_out_of_order(prev: u32, cur: u32) -> bool {
    if prev == TIMESTAMP_WRAP_SENTINEL {
        return false;
    }
    let behind = prev.wrapping_sub(cur);
    behind != 0 && behind <= u32::MAX - MAX_EXPECTED_TIMESTAMP_GAP
}
