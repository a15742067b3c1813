use std::sync::Arc;

use super::*;

/// Transport that records every written packet.
#[derive(Clone, Debug, Default)]
pub(crate) struct Mock(Arc<parking_lot::Mutex<Recorded>>);

/// Packets written to a [`Mock`] transport.
#[derive(Clone, Debug, Default)]
pub(crate) struct Recorded {
    pub cmd: Vec<Vec<u8>>,
    pub acl: Vec<Vec<u8>>,
    pub sco: Vec<Vec<u8>>,
    pub hard_resets: usize,
    /// Number of subsequent writes that fail.
    pub fail: usize,
}

impl Mock {
    /// Returns a copy of the recorded packets.
    #[must_use]
    pub fn recorded(&self) -> Recorded {
        self.0.lock().clone()
    }

    /// Returns the opcodes of all written commands.
    #[must_use]
    pub fn opcodes(&self) -> Vec<crate::hci::Opcode> {
        (self.0.lock().cmd.iter())
            .map(|c| crate::hci::Opcode::from(u16::from_le_bytes([c[0], c[1]])))
            .collect()
    }

    /// Returns the connection handles of all written ACL packets.
    #[must_use]
    pub fn acl_handles(&self) -> Vec<u16> {
        (self.0.lock().acl.iter())
            .map(|p| u16::from_le_bytes([p[0], p[1]]) & 0x0FFF)
            .collect()
    }

    /// Causes the next `n` writes to fail.
    pub fn fail_next(&self, n: usize) {
        self.0.lock().fail = n;
    }

    fn write(&self, pkt: &[u8], f: impl FnOnce(&mut Recorded) -> &mut Vec<Vec<u8>>) -> Result<()> {
        let mut r = self.0.lock();
        if r.fail > 0 {
            r.fail -= 1;
            return Err(Error::Write("mock failure".into()));
        }
        f(&mut *r).push(pkt.to_vec());
        Ok(())
    }
}

impl Transport for Mock {
    fn send_command(&mut self, pkt: &[u8]) -> Result<()> {
        self.write(pkt, |r| &mut r.cmd)
    }

    fn send_acl(&mut self, pkt: &[u8]) -> Result<()> {
        self.write(pkt, |r| &mut r.acl)
    }

    fn send_sco(&mut self, pkt: &[u8]) -> Result<()> {
        self.write(pkt, |r| &mut r.sco)
    }

    fn hard_reset(&mut self) {
        self.0.lock().hard_resets += 1;
    }
}
