//! OSC input (UDP)
//!
//! Addresses, with the configured prefix (default `/pandelirium`):
//!   /prefix/cc/<n>        float 0..1 (or int 0..127) into the CC table
//!   /prefix/fire/<n>      run the triggers on controller n once
//!   /prefix/list/params   reply: param names
//!   /prefix/get/<param>   reply: current, target, rate (or "unknown_param")
//!   /prefix/list/operators reply: registered operator names
//!
//! Replies go back to the sender on `/prefix/reply/...`.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use pandelirium_engine::animation::SharedSession;
use pandelirium_engine::config::OscCfg;
use pandelirium_engine::control::{ChannelFilter, ControlTable};
use pandelirium_engine::operator::OperatorRegistry;
use rosc::{OscMessage, OscPacket, OscType};

use crate::{logi, logw};

/// A decoded OSC request.
#[derive(Debug, Clone, PartialEq)]
pub enum OscCommand {
    Cc { cc: u8, value: CcValue },
    Fire { cc: u8 },
    ListParams,
    Get { param: String },
    ListOperators,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CcValue {
    Normalized(f32),
    Raw(u8),
}

pub fn parse_command(prefix: &str, addr: &str, args: &[OscType]) -> Option<OscCommand> {
    let rest = addr.strip_prefix(prefix)?.strip_prefix('/')?;
    let (head, tail) = match rest.split_once('/') {
        Some((h, t)) => (h, Some(t)),
        None => (rest, None),
    };

    match (head, tail) {
        ("cc", Some(n)) => {
            let cc = n.parse::<u8>().ok().filter(|c| *c <= 127)?;
            let value = match args.first()? {
                OscType::Float(f) => CcValue::Normalized(*f),
                OscType::Double(d) => CcValue::Normalized(*d as f32),
                OscType::Int(i) => CcValue::Raw((*i).clamp(0, 127) as u8),
                _ => return None,
            };
            Some(OscCommand::Cc { cc, value })
        }
        ("fire", Some(n)) => n.parse::<u8>().ok().map(|cc| OscCommand::Fire { cc }),
        ("list", Some("params")) | ("list", None) => Some(OscCommand::ListParams),
        ("list", Some("operators")) => Some(OscCommand::ListOperators),
        ("get", Some(name)) if !name.is_empty() => Some(OscCommand::Get {
            param: name.to_string(),
        }),
        _ => None,
    }
}

/// Everything the OSC thread reads or writes.
#[derive(Clone)]
pub struct OscContext {
    pub prefix: String,
    pub table: ControlTable,
    pub session: SharedSession,
    pub registry: Arc<RwLock<OperatorRegistry>>,
}

impl OscContext {
    /// Run one command. Returns the reply address and arguments, if the command has a reply.
    pub fn apply(&self, cmd: OscCommand) -> Option<(String, Vec<OscType>)> {
        let prefix = &self.prefix;
        match cmd {
            OscCommand::Cc { cc, value } => {
                // OSC has no channel; write on whichever channel the filter admits
                let ch = match self.table.filter() {
                    ChannelFilter::Any => 0,
                    ChannelFilter::Channel(c) => c,
                };
                match value {
                    CcValue::Normalized(x) => self.table.set_normalized(ch, cc, x),
                    CcValue::Raw(v) => self.table.set_cc(ch, cc, v),
                };
                None
            }
            OscCommand::Fire { cc } => {
                let fired = self.session.lock().map(|mut s| s.fire(cc)).unwrap_or_default();
                for f in &fired {
                    logi!("OSC", "fire cc={} {} -> {:?}", f.cc, f.kind, f.targets);
                }
                if fired.is_empty() {
                    logw!("OSC", "fire cc={cc}: no trigger on that controller");
                }
                None
            }
            OscCommand::ListParams => {
                let names: Vec<OscType> = self
                    .session
                    .lock()
                    .map(|s| s.params().map(|(n, _)| OscType::String(n.to_string())).collect())
                    .unwrap_or_default();
                logi!("OSC", "introspect list/params -> {} items", names.len());
                Some((format!("{prefix}/reply/list/params"), names))
            }
            OscCommand::Get { param } => {
                let found = self.session.lock().ok().and_then(|s| s.get(&param).copied());
                let args = match found {
                    Some(p) => {
                        logi!(
                            "OSC",
                            "introspect get/{param} cur={} tgt={} rate={}",
                            p.current(),
                            p.target(),
                            p.rate()
                        );
                        vec![
                            OscType::Float(p.current()),
                            OscType::Float(p.target()),
                            OscType::Float(p.rate()),
                        ]
                    }
                    None => {
                        logi!("OSC", "introspect get/{param} -> unknown_param");
                        vec![OscType::String("unknown_param".into())]
                    }
                };
                Some((format!("{prefix}/reply/get/{param}"), args))
            }
            OscCommand::ListOperators => {
                let names: Vec<OscType> = self
                    .registry
                    .read()
                    .map(|r| r.names().into_iter().map(OscType::String).collect())
                    .unwrap_or_default();
                logi!("OSC", "introspect list/operators -> {} items", names.len());
                Some((format!("{prefix}/reply/list/operators"), names))
            }
        }
    }

    fn handle_packet(&self, pkt: OscPacket, sock: &UdpSocket, from: SocketAddr) {
        match pkt {
            OscPacket::Message(msg) => match parse_command(&self.prefix, &msg.addr, &msg.args) {
                Some(cmd) => {
                    if let Some((addr, args)) = self.apply(cmd) {
                        send_reply(sock, from, addr, args);
                    }
                }
                None => logw!("OSC", "unhandled {} {:?}", msg.addr, msg.args),
            },
            OscPacket::Bundle(b) => {
                for p in b.content {
                    self.handle_packet(p, sock, from);
                }
            }
        }
    }
}

fn send_reply(sock: &UdpSocket, to: SocketAddr, addr: String, args: Vec<OscType>) {
    let pkt = OscPacket::Message(OscMessage { addr, args });
    match rosc::encoder::encode(&pkt) {
        Ok(buf) => {
            let _ = sock.send_to(&buf, to);
        }
        Err(e) => logw!("OSC", "encode error: {e}"),
    }
}

/// Stops and joins the listener thread when dropped.
pub struct OscHandle {
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Drop for OscHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

pub fn connect_osc(cfg: &OscCfg, ctx: OscContext) -> Option<OscHandle> {
    if !cfg.enabled {
        return None;
    }

    let sock = match UdpSocket::bind(&cfg.bind) {
        Ok(s) => s,
        Err(e) => {
            logw!("OSC", "Failed to bind {}: {e}", cfg.bind);
            return None;
        }
    };
    if let Err(e) = sock.set_nonblocking(true) {
        logw!("OSC", "set_nonblocking failed: {e}");
        return None;
    }

    logi!("OSC", "listening on {} prefix={}", cfg.bind, ctx.prefix);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let spawned = std::thread::Builder::new().name("osc".to_string()).spawn(move || {
        let mut buf = [0u8; rosc::decoder::MTU];
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            match sock.recv_from(&mut buf) {
                Ok((sz, from)) => match rosc::decoder::decode_udp(&buf[..sz]) {
                    Ok((_rest, pkt)) => ctx.handle_packet(pkt, &sock, from),
                    Err(e) => logw!("OSC", "decode error from {from}: {e}"),
                },
                Err(_) => std::thread::sleep(Duration::from_millis(2)),
            }
        }
        logi!("OSC", "stopped");
    });

    match spawned {
        Ok(join) => Some(OscHandle { stop_tx, join: Some(join) }),
        Err(e) => {
            logw!("OSC", "failed to spawn osc thread: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pandelirium_engine::animation::{shared, AnimationSession, FiringMode};
    use pandelirium_engine::control::ControlSource;

    const P: &str = "/pandelirium";

    fn ctx() -> OscContext {
        let mut s = AnimationSession::new(0.7, FiringMode::Level).unwrap();
        s.add_param("scale", 1.0, 0.1).unwrap();
        OscContext {
            prefix: P.into(),
            table: ControlTable::new(ChannelFilter::Any),
            session: shared(s),
            registry: Arc::new(RwLock::new(OperatorRegistry::new())),
        }
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(
            parse_command(P, "/pandelirium/cc/4", &[OscType::Float(0.9)]),
            Some(OscCommand::Cc { cc: 4, value: CcValue::Normalized(0.9) })
        );
        assert_eq!(
            parse_command(P, "/pandelirium/cc/5", &[OscType::Int(127)]),
            Some(OscCommand::Cc { cc: 5, value: CcValue::Raw(127) })
        );
        assert_eq!(parse_command(P, "/pandelirium/fire/6", &[]), Some(OscCommand::Fire { cc: 6 }));
        assert_eq!(parse_command(P, "/pandelirium/list/params", &[]), Some(OscCommand::ListParams));
        assert_eq!(parse_command(P, "/pandelirium/list", &[]), Some(OscCommand::ListParams));
        assert_eq!(
            parse_command(P, "/pandelirium/list/operators", &[]),
            Some(OscCommand::ListOperators)
        );
        assert_eq!(
            parse_command(P, "/pandelirium/get/scale", &[]),
            Some(OscCommand::Get { param: "scale".into() })
        );
        assert_eq!(parse_command(P, "/pandelirium/cc/200", &[OscType::Float(1.0)]), None);
        assert_eq!(parse_command(P, "/pandelirium/cc/4", &[]), None);
        assert_eq!(parse_command(P, "/other/cc/4", &[OscType::Float(1.0)]), None);
        assert_eq!(parse_command(P, "/pandeliriumx/list", &[]), None);
    }

    #[test]
    fn cc_writes_reach_the_table() {
        let c = ctx();
        assert!(c.apply(OscCommand::Cc { cc: 4, value: CcValue::Normalized(0.9) }).is_none());
        assert_eq!(c.table.sample(4), Some(0.9));
        c.apply(OscCommand::Cc { cc: 4, value: CcValue::Raw(0) });
        assert_eq!(c.table.sample(4), Some(0.0));
    }

    #[test]
    fn introspection_replies() {
        let c = ctx();
        let (addr, args) = c.apply(OscCommand::Get { param: "scale".into() }).unwrap();
        assert_eq!(addr, "/pandelirium/reply/get/scale");
        assert_eq!(args, vec![OscType::Float(1.0), OscType::Float(1.0), OscType::Float(0.1)]);

        let (_, args) = c.apply(OscCommand::Get { param: "nope".into() }).unwrap();
        assert_eq!(args, vec![OscType::String("unknown_param".into())]);

        let (addr, args) = c.apply(OscCommand::ListParams).unwrap();
        assert_eq!(addr, "/pandelirium/reply/list/params");
        assert_eq!(args, vec![OscType::String("scale".into())]);

        let (_, args) = c.apply(OscCommand::ListOperators).unwrap();
        assert!(args.is_empty());
    }
}
