//! C ABI for linking pico-core as a static library from firmware or other C hosts.
//! Mirrors the `pico_config_*` call shape: create, register tx, set handler map, then
//! send / receive / run from the host loop.

use std::cell::{Cell, UnsafeCell};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;
use std::slice;

use tracing::warn;

use crate::config::Config;
use crate::engine::Engine;
use crate::registry::{Handler, HandlerEntry, Registry};
use crate::status::{EngineError, Status, TransportError};
use crate::transport::Transport;
use crate::wire::{Id, Payload, MAX_PAYLOAD};

/// Driver transmit function. Returns 0 on success, any other value is passed back to the caller.
pub type TxFn = extern "C" fn(low_layer_obj: *mut c_void, data: *const u8, data_size: usize) -> i32;

/// Request handler. Writes at most `max_out_data_size` bytes to `data_out`, sets `*data_out_size`,
/// returns 0 or a status code.
pub type RequestHandlerFn = extern "C" fn(
    ctx: *mut c_void,
    data_in: *const u8,
    data_in_size: usize,
    max_out_data_size: usize,
    data_out: *mut u8,
    data_out_size: *mut usize,
) -> i32;

/// Response handler. `data_in` is null when `data_in_size` is 0 (e.g. on timeout); the same
/// holds for `data_in` of a request handler.
pub type ResponseHandlerFn =
    extern "C" fn(ctx: *mut c_void, status: i32, data_in: *const u8, data_in_size: usize);

#[repr(C)]
pub struct PicoConfigSettings {
    pub max_req_rsp_time: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PicoConfigHandler {
    pub id: u8,
    pub request_handler: Option<RequestHandlerFn>,
    pub response_handler: Option<ResponseHandlerFn>,
}

struct CTransport {
    low_layer_obj: *mut c_void,
    tx: Option<TxFn>,
}

impl Transport for CTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.ok_or(TransportError::NotRegistered)?;
        match tx(self.low_layer_obj, frame.as_ptr(), frame.len()) {
            0 => Ok(()),
            code => Err(TransportError::Code(code)),
        }
    }
}

struct CHandler {
    ctx: *mut c_void,
    request: Option<RequestHandlerFn>,
    response: Option<ResponseHandlerFn>,
}

impl Handler for CHandler {
    fn handle_request(&mut self, input: &[u8], output: &mut Payload) -> Option<Status> {
        let f = self.request?;
        let mut buf = [0u8; MAX_PAYLOAD];
        let mut written = 0usize;
        let r = f(
            self.ctx,
            data_ptr(input),
            input.len(),
            MAX_PAYLOAD,
            buf.as_mut_ptr(),
            &mut written,
        );
        if written > MAX_PAYLOAD {
            warn!(written, max = MAX_PAYLOAD, "request handler overran its output, truncating");
            written = MAX_PAYLOAD;
        }
        // buf and output have the same capacity.
        *output = Payload::from_slice(&buf[..written]).unwrap_or_default();
        Some(match u8::try_from(r) {
            Ok(code) => Status::from_code(code),
            Err(_) => Status::Other(0xff),
        })
    }

    fn handle_response(&mut self, status: Status, input: &[u8]) {
        if let Some(f) = self.response {
            f(self.ctx, status.code() as i32, data_ptr(input), input.len());
        }
    }
}

type CEngine = Engine<CTransport>;

/// What the opaque handle points at. `in_call` is set while an exported function is running,
/// so a handler calling back into the same engine is refused instead of aliasing it.
struct CHandle {
    in_call: Cell<bool>,
    engine: UnsafeCell<CEngine>,
}

/// Run `f` on the engine behind `h`. `Args` for a null handle, `DataNotReady` when called from
/// inside one of this engine's handlers or transmit function.
fn with_engine<R>(h: *mut c_void, f: impl FnOnce(&mut CEngine) -> R) -> Result<R, Status> {
    if h.is_null() {
        return Err(Status::Args);
    }
    let handle = unsafe { &*(h as *const CHandle) };
    if handle.in_call.replace(true) {
        warn!("re-entrant pico_config call refused");
        return Err(Status::DataNotReady);
    }
    let r = f(unsafe { &mut *handle.engine.get() });
    handle.in_call.set(false);
    Ok(r)
}

fn result_code(r: Result<(), EngineError>) -> i32 {
    match r {
        Ok(()) => Status::NoError.code() as i32,
        Err(EngineError::Transport(TransportError::Code(code))) => code,
        Err(e) => e.status().code() as i32,
    }
}

/// Null for an empty slice, so callbacks never see a dangling pointer.
fn data_ptr(data: &[u8]) -> *const u8 {
    if data.is_empty() {
        ptr::null()
    } else {
        data.as_ptr()
    }
}

/// Borrow `size` bytes at `data`. `None` when data is null but size is not 0.
unsafe fn input_slice<'a>(data: *const u8, size: usize) -> Option<&'a [u8]> {
    if size == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        return None;
    }
    Some(slice::from_raw_parts(data, size))
}

/// Create an engine. Returns opaque handle or null if `settings` is null.
#[no_mangle]
pub extern "C" fn pico_config_create(settings: *const PicoConfigSettings) -> *mut c_void {
    if settings.is_null() {
        return ptr::null_mut();
    }
    let settings = unsafe { &*settings };
    let engine = CEngine::new(
        Config::with_round_trip_budget(settings.max_req_rsp_time),
        CTransport {
            low_layer_obj: ptr::null_mut(),
            tx: None,
        },
    );
    let handle = CHandle {
        in_call: Cell::new(false),
        engine: UnsafeCell::new(engine),
    };
    Box::into_raw(Box::new(handle)) as *mut c_void
}

/// Destroy engine. No-op if h is null or if called from inside a handler.
#[no_mangle]
pub extern "C" fn pico_config_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    if unsafe { &*(h as *const CHandle) }.in_call.get() {
        warn!("pico_config_destroy from inside a handler ignored");
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut CHandle) };
}

/// Attach the driver object and its transmit function.
#[no_mangle]
pub extern "C" fn pico_config_register_tx(h: *mut c_void, drv: *mut c_void, tx: Option<TxFn>) {
    let _ = with_engine(h, |engine| {
        let t = engine.transport_mut();
        t.low_layer_obj = drv;
        t.tx = tx;
    });
}

/// Driver object passed to `pico_config_register_tx`, or null.
#[no_mangle]
pub extern "C" fn pico_config_get_low_layer_drv_data(h: *mut c_void) -> *mut c_void {
    with_engine(h, |engine| engine.transport().low_layer_obj).unwrap_or(ptr::null_mut())
}

/// Copy the handler map into the engine. `ctx` is passed to every handler call.
/// Ignored when map is null or map_size is 0. Entries with id > 63 are skipped.
///
/// Handlers must not call back into the engine that invoked them: such calls are refused
/// (`DataNotReady` from the send functions, no effect elsewhere). Queue the work and issue it
/// from the host loop instead.
#[no_mangle]
pub extern "C" fn pico_config_set_handlers_map(
    h: *mut c_void,
    map: *const PicoConfigHandler,
    map_size: usize,
    ctx: *mut c_void,
) {
    if map.is_null() || map_size == 0 {
        return;
    }
    let map = unsafe { slice::from_raw_parts(map, map_size) };
    let entries = map
        .iter()
        .filter_map(|m| match Id::new(m.id) {
            Ok(id) => Some(HandlerEntry::new(
                id,
                CHandler {
                    ctx,
                    request: m.request_handler,
                    response: m.response_handler,
                },
            )),
            Err(_) => {
                warn!(id = m.id, "skipping handler with out-of-range id");
                None
            }
        })
        .collect();
    let _ = with_engine(h, |engine| engine.set_handlers(Registry::with_entries(entries)));
}

/// Send a request. Returns 0, a status code, or the driver's own non-zero tx result.
#[no_mangle]
pub extern "C" fn pico_config_send_request(
    h: *mut c_void,
    id: u8,
    data: *const u8,
    data_size: usize,
    wait_for_ack_nack: bool,
) -> i32 {
    let Some(payload) = (unsafe { input_slice(data, data_size) }) else {
        return Status::Args.code() as i32;
    };
    with_engine(h, |engine| result_code(engine.send_request(id, payload, wait_for_ack_nack)))
        .unwrap_or_else(|s| s.code() as i32)
}

/// Send a response. Same return convention as `pico_config_send_request`.
#[no_mangle]
pub extern "C" fn pico_config_send_response(
    h: *mut c_void,
    id: u8,
    ack: bool,
    data: *const u8,
    data_size: usize,
) -> i32 {
    let Some(payload) = (unsafe { input_slice(data, data_size) }) else {
        return Status::Args.code() as i32;
    };
    with_engine(h, |engine| result_code(engine.send_response(id, ack, payload)))
        .unwrap_or_else(|s| s.code() as i32)
}

/// Feed one inbound frame. Null or empty input is ignored.
#[no_mangle]
pub extern "C" fn pico_config_receive(h: *mut c_void, data: *const u8, data_size: usize) {
    if data.is_null() || data_size == 0 {
        return;
    }
    let frame = unsafe { slice::from_raw_parts(data, data_size) };
    let _ = with_engine(h, |engine| engine.receive(frame));
}

/// Advance the response timer.
#[no_mangle]
pub extern "C" fn pico_config_run(h: *mut c_void, time_from_last_call: u32) {
    let _ = with_engine(h, |engine| engine.tick(time_from_last_call));
}

/// 1 while a request awaits its response, 0 otherwise (and for a null handle).
#[no_mangle]
pub extern "C" fn pico_config_is_waiting(h: *mut c_void) -> c_int {
    with_engine(h, |engine| engine.is_awaiting_response() as c_int).unwrap_or(0)
}
