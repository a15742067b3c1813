//! Runs the gate against a simulated controller that accepts every command,
//! connects to any device, and reports every ACL packet as completed.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use hcigate::hci::{Command, Opcode};
use hcigate::host::{self, Transport};
use hcigate::*;

const PEER: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

/// Packet written by the host.
#[derive(Debug)]
enum Out {
    Cmd(Vec<u8>),
    Acl(Vec<u8>),
}

/// Transport that forwards written packets to the simulated controller.
#[derive(Debug)]
struct Loopback(mpsc::UnboundedSender<Out>);

impl Transport for Loopback {
    fn send_command(&mut self, pkt: &[u8]) -> host::Result<()> {
        (self.0.send(Out::Cmd(pkt.to_vec()))).map_err(|_| host::Error::Unavailable)
    }

    fn send_acl(&mut self, pkt: &[u8]) -> host::Result<()> {
        (self.0.send(Out::Acl(pkt.to_vec()))).map_err(|_| host::Error::Unavailable)
    }

    fn send_sco(&mut self, _: &[u8]) -> host::Result<()> {
        Err(host::Error::Unavailable)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let (tx, rx) = mpsc::unbounded_channel();
    let (gate, event_loop) = Gate::new(Loopback(tx), Config::default())?;
    let ctlr = tokio::spawn(controller(gate.clone(), rx));

    gate.setup().await?;
    let addr = gate.exec(Command::ReadBdAddr).await?.into_result()?;
    info!("Local address: {addr:02X?}");

    let peer = RawAddr::from(PEER);
    let c = gate
        .exec(Command::CreateConnection {
            addr: peer,
            packet_type: 0xCC18,
            page_scan_repetition_mode: 0x01,
            clock_offset: 0,
            allow_role_switch: true,
        })
        .await?;
    info!("Connected: {:02X?}", c.into_result()?);
    gate.set_priority(peer, Tier::High).await?;
    let batch = (0..16_u8)
        .map(|i| Outbound::new(peer, vec![i; 32]))
        .collect();
    info!("Batch: {:?}", gate.send_packets(batch).await?);
    tokio::time::sleep(Duration::from_millis(10)).await;
    info!("Stats: {:?}", gate.stats().await?);

    gate.shutdown().await?;
    event_loop.await?;
    ctlr.await?;
    Ok(())
}

/// Simulated controller. Connection requests are acknowledged by
/// `Command_Status` and completed with a new handle. All other commands
/// complete successfully. Every ACL packet is acknowledged by a
/// `Number_Of_Completed_Packets` event.
async fn controller(gate: Gate, mut rx: mpsc::UnboundedReceiver<Out>) {
    let (mut seq, mut next_handle) = (0, 0x0040_u16);
    while let Some(out) = rx.recv().await {
        let events = match out {
            Out::Cmd(c) => {
                let op = Opcode::from(u16::from_le_bytes([c[0], c[1]]));
                let code = u16::from(op).to_le_bytes();
                if op == Opcode::CREATE_CONNECTION {
                    let mut conn = vec![0x03, 11, 0x00];
                    conn.extend_from_slice(&next_handle.to_le_bytes());
                    conn.extend_from_slice(&c[3..9]);
                    conn.extend_from_slice(&[0x01, 0x00]);
                    next_handle += 1;
                    vec![vec![0x0F, 4, 0x00, 1, code[0], code[1]], conn]
                } else {
                    let ret: &[u8] = match op {
                        Opcode::READ_BUFFER_SIZE => &[0xFD, 0x03, 0x40, 0x04, 0x00, 0x02, 0x00],
                        Opcode::LE_READ_BUFFER_SIZE => &[0xFB, 0x00, 0x00],
                        Opcode::READ_BD_ADDR => &[0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
                        _ => &[],
                    };
                    let mut v = vec![0x0E, 0, 1, code[0], code[1], 0x00];
                    v.extend_from_slice(ret);
                    #[allow(clippy::cast_possible_truncation)]
                    let n = (v.len() - 2) as u8;
                    v[1] = n;
                    vec![v]
                }
            }
            Out::Acl(p) => vec![vec![0x13, 5, 1, p[0], p[1] & 0x0F, 1, 0]],
        };
        for raw in events {
            seq += 1;
            if gate.event(raw, seq).await.is_err() {
                return;
            }
        }
    }
}
