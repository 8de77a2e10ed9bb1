// src/moonraker/notify.rs - Edge detection between consecutive snapshots
use tft_shared::{Layer, NotificationEvent, PrintState, PrinterStatus};

/// Remembers what the panel was last told and turns each new status into the
/// events that differ from it. Feeding the same status twice yields nothing.
#[derive(Debug)]
pub struct NotificationTracker {
    step: u8,
    last_state: Option<PrintState>,
    last_bucket: Option<u8>,
    last_layer: Option<Layer>,
    last_fan: Option<u8>,
}

impl NotificationTracker {
    pub fn new(progress_step_percent: u8) -> Self {
        Self {
            step: progress_step_percent.clamp(1, 100),
            last_state: None,
            last_bucket: None,
            last_layer: None,
            last_fan: None,
        }
    }

    pub fn observe(&mut self, status: &PrinterStatus) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        self.observe_state(status.print_state, &mut events);
        if status.print_state.is_active() {
            self.observe_progress(status, &mut events);
            self.observe_layer(status.layer, &mut events);
        }
        // First fan reading is a baseline, like the print state.
        let prev_fan = self.last_fan.replace(status.fan_speed_percent);
        if prev_fan.is_some_and(|prev| prev != status.fan_speed_percent) {
            events.push(NotificationEvent::FanChanged { percent: status.fan_speed_percent });
        }
        events
    }

    fn observe_state(&mut self, next: PrintState, events: &mut Vec<NotificationEvent>) {
        let prev = self.last_state.replace(next);
        // The first observation only establishes a baseline, unless a print is
        // already running when the bridge starts.
        let prev_state = prev.unwrap_or(PrintState::Standby);
        if prev == Some(next) {
            return;
        }
        match (prev_state, next) {
            (PrintState::Paused, PrintState::Printing) => events.push(NotificationEvent::Resumed),
            (_, PrintState::Printing) => {
                self.start_job();
                events.push(NotificationEvent::PrintStarted);
            }
            (PrintState::Printing, PrintState::Paused) => events.push(NotificationEvent::Paused),
            (_, PrintState::Paused) => {
                self.start_job();
                events.push(NotificationEvent::PrintStarted);
                events.push(NotificationEvent::Paused);
            }
            (was, PrintState::Complete) if was.is_active() => events.push(NotificationEvent::PrintFinished),
            (was, PrintState::Cancelled | PrintState::Error | PrintState::Standby) if was.is_active() => {
                events.push(NotificationEvent::PrintCancelled)
            }
            _ => {}
        }
    }

    fn start_job(&mut self) {
        self.last_bucket = None;
        self.last_layer = None;
    }

    fn observe_progress(&mut self, status: &PrinterStatus, events: &mut Vec<NotificationEvent>) {
        let Some(pct) = status.progress.percent_done else {
            return;
        };
        let percent = pct.clamp(0.0, 100.0).floor() as u8;
        let bucket = percent / self.step;
        if self.last_bucket == Some(bucket) {
            return;
        }
        self.last_bucket = Some(bucket);
        events.push(NotificationEvent::Progress {
            percent,
            time_left_sec: status.progress.time_left_sec.map(|t| t.max(0.0).round() as u64),
        });
    }

    fn observe_layer(&mut self, layer: Option<Layer>, events: &mut Vec<NotificationEvent>) {
        let Some(layer) = layer else {
            return;
        };
        if layer.current == 0 || layer.current > layer.total || self.last_layer == Some(layer) {
            return;
        }
        self.last_layer = Some(layer);
        events.push(NotificationEvent::LayerChanged { current: layer.current, total: layer.total });
    }
}
