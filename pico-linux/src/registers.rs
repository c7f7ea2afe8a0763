//! Configuration registers served to the peer, plus the reply slot used by one-shot commands.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context};
use pico_core::{Handler, HandlerEntry, Id, Payload, Registry, Status};
use tracing::info;

use crate::config::RegisterConfig;

/// One register. An empty request reads it; a request with a payload overwrites it.
pub struct Register {
    id: Id,
    value: Payload,
}

impl Register {
    pub fn new(id: Id, value: &[u8]) -> anyhow::Result<Self> {
        let value = Payload::from_slice(value).map_err(|_| {
            anyhow::anyhow!(
                "register {} value longer than {} bytes",
                id,
                pico_core::MAX_PAYLOAD
            )
        })?;
        Ok(Self { id, value })
    }
}

impl Handler for Register {
    fn handle_request(&mut self, input: &[u8], output: &mut Payload) -> Option<Status> {
        if input.is_empty() {
            output.clone_from(&self.value);
        } else {
            // Inbound frames are not bounded by the codec; refuse what we could not read back.
            let Ok(v) = Payload::from_slice(input) else {
                return Some(Status::PayloadOutOfBounds);
            };
            info!(id = %self.id, len = v.len(), "register written");
            self.value = v;
        }
        Some(Status::NoError)
    }
}

/// Build the handler table from config. Duplicate ids are rejected here even though the
/// registry itself would accept them.
pub fn registry(registers: &[RegisterConfig]) -> anyhow::Result<Registry> {
    let mut entries = Vec::with_capacity(registers.len());
    for r in registers {
        let id = Id::new(r.id).with_context(|| format!("register id {}", r.id))?;
        if entries.iter().any(|e: &HandlerEntry| e.id() == id) {
            bail!("register {} configured twice", id);
        }
        entries.push(HandlerEntry::new(id, Register::new(id, &r.value)?));
    }
    Ok(Registry::with_entries(entries))
}

/// Response handler that parks the outcome for the command loop to pick up.
#[derive(Clone, Default)]
pub struct ReplySlot {
    inner: Rc<RefCell<Option<(Status, Vec<u8>)>>>,
}

impl ReplySlot {
    pub fn take(&self) -> Option<(Status, Vec<u8>)> {
        self.inner.borrow_mut().take()
    }
}

impl Handler for ReplySlot {
    fn handle_response(&mut self, status: Status, input: &[u8]) {
        *self.inner.borrow_mut() = Some((status, input.to_vec()));
    }
}
