//! MIDI input: Control Change messages from one device feed the CC table.

use std::sync::atomic::{AtomicUsize, Ordering};

use midir::{Ignore, MidiInput, MidiInputConnection};
use pandelirium_engine::config::MidiCfg;
use pandelirium_engine::control::ControlTable;

use crate::{logi, logw};

/// First N CC messages are logged verbatim; after that only the ones the filter drops.
const VERBOSE_CC_LOGS: usize = 80;

/// `(channel 0..15, controller, value 0..127)` for a Control Change message.
pub fn decode_cc(msg: &[u8]) -> Option<(u8, u8, u8)> {
    match msg {
        [status, cc, val] if status & 0xF0 == 0xB0 => Some((status & 0x0F, *cc, *val)),
        _ => None,
    }
}

/// Port whose name contains `wanted` (case-insensitive), else the first port.
pub fn pick_port(names: &[String], wanted: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    let wanted = wanted.map(str::to_lowercase);
    let found = wanted.and_then(|w| names.iter().position(|n| n.to_lowercase().contains(&w)));
    Some(found.unwrap_or(0))
}

/// Whether the port we connected to is still listed.
pub fn port_still_present(names: &[String], connected: &str) -> bool {
    names.iter().any(|n| n == connected)
}

/// An open input. Input flows for as long as this is alive.
pub struct MidiLink {
    _conn: MidiInputConnection<()>,
    port_name: String,
}

impl MidiLink {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Names of the input ports visible right now, from a fresh client.
pub fn list_port_names() -> Option<Vec<String>> {
    let midi_in = MidiInput::new("pandelirium-midi-watch").ok()?;
    let names = midi_in
        .ports()
        .iter()
        .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".into()))
        .collect();
    Some(names)
}

pub fn connect_midi(cfg: &MidiCfg, table: ControlTable) -> Option<MidiLink> {
    let mut midi_in = match MidiInput::new("pandelirium-midi") {
        Ok(m) => m,
        Err(e) => {
            logw!("MIDI", "MIDI unavailable: {e}");
            return None;
        }
    };
    midi_in.ignore(Ignore::None);

    let ports = midi_in.ports();
    if ports.is_empty() {
        logi!("MIDI", "No MIDI input ports detected.");
        return None;
    }

    let names: Vec<String> = ports
        .iter()
        .map(|p| midi_in.port_name(p).unwrap_or_else(|_| "Unknown".into()))
        .collect();
    let idx = pick_port(&names, cfg.input_contains.as_deref())?;
    if let Some(want) = &cfg.input_contains {
        if !names[idx].to_lowercase().contains(&want.to_lowercase()) {
            logw!("MIDI", "no input matching '{want}', falling back to '{}'", names[idx]);
        }
    }

    let in_port = ports[idx].clone();
    let port_name = names[idx].clone();
    logi!("MIDI", "Connecting input: {port_name}");

    let conn = midi_in.connect(
        &in_port,
        "pandelirium-midi-in",
        move |_ts, msg, _| {
            let Some((ch, cc, val)) = decode_cc(msg) else {
                return;
            };
            static SEEN: AtomicUsize = AtomicUsize::new(0);
            let n = SEEN.fetch_add(1, Ordering::Relaxed);

            let admitted = table.set_cc(ch, cc, val);
            if n < VERBOSE_CC_LOGS || !admitted {
                logi!("MIDI", "ch={} cc={} val={} admitted={}", ch + 1, cc, val, admitted);
            }
        },
        (),
    );

    match conn {
        Ok(c) => Some(MidiLink { _conn: c, port_name }),
        Err(e) => {
            logw!("MIDI", "Failed to connect MIDI input: {e}");
            None
        }
    }
}
