//! In-process loopback provider
//!
//! This provider serves a small database of named records living in the same
//! process. It speaks the same callback protocol as a networked provider, with
//! callbacks delivered through a [`CallbackExecutor`], so that the put
//! coordinator can be exercised either re-entrantly (inline executor) or from
//! a foreign thread (thread executor).
//!
//! A few knobs let tests reproduce what goes wrong on real networks: writes
//! can be made to fail, held back without acknowledgement, and channels can
//! be disconnected.

use crate::bitset::BitSet;
use crate::error::PutError;
use crate::executor::CallbackExecutor;
use crate::provider::{Channel, ChannelPut, ChannelPutRequester, Provider, Status};
use crate::request::PvRequest;
use crate::value::{PVStructure, Structure};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};


/// Name under which the loopback provider is known
pub const PROVIDER_NAME: &str = "loopback";

const NOT_CONNECTED: &str = "Channel not connected";


/// Provider serving in-process records
pub struct LoopbackProvider {
    records: Mutex<HashMap<String, Arc<Record>>>,
    executor: Arc<dyn CallbackExecutor>,
}
//
impl LoopbackProvider {
    /// Create an empty database, whose callbacks run on some executor
    pub fn new(executor: Arc<dyn CallbackExecutor>) -> Self {
        LoopbackProvider {
            records: Mutex::new(HashMap::new()),
            executor,
        }
    }

    /// Add or replace a record
    pub fn add_record(&self, name: &str, value: PVStructure) {
        let record = Arc::new(Record {
            name: name.to_owned(),
            value: Mutex::new(value),
            connected: AtomicBool::new(true),
            write_failure: Mutex::new(None),
            hold_writes: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
        });
        self.records.lock().insert(name.to_owned(), record);
    }

    fn record(&self, name: &str) -> Option<Arc<Record>> {
        self.records.lock().get(name).cloned()
    }

    /// Current value of a record
    pub fn read(&self, name: &str) -> Option<PVStructure> {
        self.record(name).map(|record| record.value.lock().clone())
    }

    /// Number of writes a record has processed
    pub fn write_count(&self, name: &str) -> usize {
        self.record(name).map_or(0, |record| record.writes.load(Ordering::SeqCst))
    }

    /// Make writes to a record fail with some status, or succeed again
    pub fn fail_writes(&self, name: &str, failure: Option<Status>) {
        if let Some(record) = self.record(name) {
            *record.write_failure.lock() = failure;
        }
    }

    /// Hold writes to a record back, without processing nor acknowledging them
    pub fn hold_writes(&self, name: &str, hold: bool) {
        if let Some(record) = self.record(name) {
            record.hold_writes.store(hold, Ordering::SeqCst);
        }
    }

    /// Process and acknowledge the writes which were held back
    pub fn release_writes(&self, name: &str) {
        let Some(record) = self.record(name) else { return };
        let held = mem::take(&mut *record.held.lock());
        for HeldWrite { put, value, changed } in held {
            put.schedule(move |put, requester| put.complete_write(requester, value, changed));
        }
    }

    /// Drop the connection of a record's channels, losing in-flight writes
    pub fn disconnect(&self, name: &str) {
        let Some(record) = self.record(name) else { return };
        record.connected.store(false, Ordering::SeqCst);
        record.held.lock().clear();
        for put in record.live_puts() {
            put.schedule(|_, requester| requester.channel_disconnect(false));
        }
    }

    /// Restore the connection of a record's channels
    pub fn reconnect(&self, name: &str) {
        if let Some(record) = self.record(name) {
            record.connected.store(true, Ordering::SeqCst);
        }
    }

    /// Wait until every callback scheduled so far was delivered
    pub fn sync(&self) {
        self.executor.sync();
    }
}
//
impl Provider for LoopbackProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn connect(&self, channel_name: &str) -> Result<Arc<dyn Channel>, PutError> {
        let record = self.record(channel_name)
                         .ok_or_else(|| PutError::ChannelNotFound(channel_name.to_owned()))?;
        let channel = Arc::new_cyclic(|this| LoopbackChannel {
            record,
            executor: self.executor.clone(),
            this: this.clone(),
        });
        Ok(channel)
    }
}


/// One named record of the database
struct Record {
    name: String,
    value: Mutex<PVStructure>,
    connected: AtomicBool,
    write_failure: Mutex<Option<Status>>,
    hold_writes: AtomicBool,
    held: Mutex<Vec<HeldWrite>>,

    /// Put sub-operations to be told about disconnects
    puts: Mutex<Vec<Weak<LoopbackPut>>>,

    writes: AtomicUsize,
}
//
impl Record {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn register(&self, put: &Arc<LoopbackPut>) {
        let mut puts = self.puts.lock();
        puts.retain(|p| p.strong_count() > 0);
        puts.push(Arc::downgrade(put));
    }

    fn live_puts(&self) -> Vec<Arc<LoopbackPut>> {
        self.puts.lock().iter().filter_map(Weak::upgrade).collect()
    }
}


/// Write which was received, but not processed yet
struct HeldWrite {
    put: Arc<LoopbackPut>,
    value: PVStructure,
    changed: BitSet,
}


/// Channel to one record
struct LoopbackChannel {
    record: Arc<Record>,
    executor: Arc<dyn CallbackExecutor>,
    this: Weak<LoopbackChannel>,
}
//
impl Channel for LoopbackChannel {
    fn channel_name(&self) -> String {
        self.record.name.clone()
    }

    fn is_connected(&self) -> bool {
        self.record.is_connected()
    }

    fn create_channel_put(&self,
                          requester: Arc<dyn ChannelPutRequester>,
                          request: &PvRequest) -> Arc<dyn ChannelPut> {
        let put = Arc::new_cyclic(|this| LoopbackPut {
            this: this.clone(),
            channel: self.this.upgrade(),
            record: self.record.clone(),
            executor: self.executor.clone(),
            requester: Arc::downgrade(&requester),
            put_type: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        self.record.register(&put);

        let put_type = request.put_type(self.record.value.lock().structure());
        put.schedule(move |put, requester| {
            let op: Arc<dyn ChannelPut> = put.clone();
            if !put.record.is_connected() {
                requester.channel_put_connect(Status::error(NOT_CONNECTED), op, None);
                return;
            }
            match put_type {
                Ok(put_type) => {
                    *put.put_type.lock() = Some(put_type.clone());
                    requester.channel_put_connect(Status::ok(), op, Some(put_type));
                }
                Err(why) => requester.channel_put_connect(Status::error(why), op, None),
            }
        });
        put
    }
}


/// Put sub-operation on one record
struct LoopbackPut {
    this: Weak<LoopbackPut>,

    /// Kept alive for as long as the sub-operation
    channel: Option<Arc<LoopbackChannel>>,

    record: Arc<Record>,
    executor: Arc<dyn CallbackExecutor>,

    /// Requesters are not kept alive by the sub-operations they drive
    requester: Weak<dyn ChannelPutRequester>,

    /// Type of the values written, known once connected
    put_type: Mutex<Option<Arc<Structure>>>,

    cancelled: AtomicBool,
}
//
impl LoopbackPut {
    /// Deliver a callback to the requester, if it is still around
    fn schedule<F>(&self, callback: F)
        where F: FnOnce(&Arc<LoopbackPut>, Arc<dyn ChannelPutRequester>) + Send + 'static
    {
        let Some(this) = self.this.upgrade() else { return };
        self.executor.execute(Box::new(move || {
            match this.requester.upgrade() {
                Some(requester) => callback(&this, requester),
                None => trace!(channel = %this.record.name, "requester gone, dropping callback"),
            }
        }));
    }

    /// Process a write and acknowledge it
    fn complete_write(self: &Arc<Self>,
                      requester: Arc<dyn ChannelPutRequester>,
                      value: PVStructure,
                      changed: BitSet) {
        if self.cancelled.load(Ordering::SeqCst) {
            debug!(channel = %self.record.name, "write cancelled before processing");
            return;
        }
        self.record.value.lock().merge_from(&value, &changed);
        self.record.writes.fetch_add(1, Ordering::SeqCst);
        trace!(channel = %self.record.name, %changed, "write processed");
        requester.put_done(Status::ok(), self.clone());
    }
}
//
impl ChannelPut for LoopbackPut {
    fn channel(&self) -> Option<Arc<dyn Channel>> {
        let channel = self.channel.clone()?;
        Some(channel)
    }

    fn get(&self) {
        self.schedule(|put, requester| {
            let op: Arc<dyn ChannelPut> = put.clone();
            let put_type = put.put_type.lock().clone();
            match put_type {
                Some(put_type) if put.record.is_connected() => {
                    let mut current = PVStructure::new(&put_type);
                    current.merge_from(&put.record.value.lock(), &BitSet::full(1));
                    let valid = BitSet::full(put_type.field_count());
                    requester.get_done(Status::ok(), op, Some(current), valid);
                }
                _ => requester.get_done(Status::error(NOT_CONNECTED), op, None, BitSet::new()),
            }
        });
    }

    fn put(&self, value: PVStructure, changed: BitSet) {
        self.schedule(move |put, requester| {
            let op: Arc<dyn ChannelPut> = put.clone();
            if put.cancelled.load(Ordering::SeqCst) {
                debug!(channel = %put.record.name, "write cancelled before processing");
                return;
            }
            if !put.record.is_connected() {
                requester.put_done(Status::error(NOT_CONNECTED), op);
                return;
            }
            let put_type = put.put_type.lock().clone();
            if put_type.as_ref() != Some(value.structure()) {
                requester.put_done(Status::error("Put value does not match put type"), op);
                return;
            }
            let failure = put.record.write_failure.lock().clone();
            if let Some(failure) = failure {
                requester.put_done(failure, op);
                return;
            }
            if put.record.hold_writes.load(Ordering::SeqCst) {
                put.record.held.lock().push(HeldWrite { put: put.clone(), value, changed });
                return;
            }
            put.complete_write(requester, value, changed);
        });
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use crate::value::{ScalarType, ScalarValue};

    /// Requester which records every report
    #[derive(Default)]
    struct Log {
        reports: Mutex<Vec<String>>,
        put_type: Mutex<Option<Arc<Structure>>>,
        fetched: Mutex<Option<(PVStructure, BitSet)>>,
    }
    //
    impl ChannelPutRequester for Log {
        fn channel_put_connect(&self,
                               status: Status,
                               _put: Arc<dyn ChannelPut>,
                               put_type: Option<Arc<Structure>>) {
            *self.put_type.lock() = put_type;
            self.reports.lock().push(format!("connect {}", status));
        }

        fn get_done(&self,
                    status: Status,
                    _put: Arc<dyn ChannelPut>,
                    value: Option<PVStructure>,
                    valid: BitSet) {
            *self.fetched.lock() = value.map(|v| (v, valid));
            self.reports.lock().push(format!("get {}", status));
        }

        fn put_done(&self, status: Status, _put: Arc<dyn ChannelPut>) {
            self.reports.lock().push(format!("put {}", status));
        }

        fn channel_disconnect(&self, destroy: bool) {
            self.reports.lock().push(format!("disconnect {}", destroy));
        }
    }
    //
    impl Log {
        fn reports(&self) -> Vec<String> {
            self.reports.lock().clone()
        }
    }

    fn provider() -> LoopbackProvider {
        let provider = LoopbackProvider::new(Arc::new(InlineExecutor::new()));
        let mut value = PVStructure::new(&Structure::nt_scalar(ScalarType::Double));
        value.put_from("value", "1.0").unwrap();
        value.put_from("descriptor", "test record").unwrap();
        provider.add_record("double01", value);
        provider
    }

    fn start(provider: &LoopbackProvider, request: &str) -> (Arc<Log>, Arc<dyn ChannelPut>) {
        let channel = provider.connect("double01").unwrap();
        let log = Arc::new(Log::default());
        let put = channel.create_channel_put(log.clone(), &PvRequest::parse(request).unwrap());
        (log, put)
    }

    fn write(put: &Arc<dyn ChannelPut>, log: &Log, text: &str) {
        let put_type = log.put_type.lock().clone().unwrap();
        let mut value = PVStructure::new(&put_type);
        let offset = value.put_from("value", text).unwrap();
        put.put(value, [offset].into_iter().collect());
    }

    /// Unknown channels are reported as such
    #[test]
    fn unknown_channel() {
        assert!(matches!(provider().connect("nope"), Err(PutError::ChannelNotFound(_))));
    }

    /// Connect reports the requested structure
    #[test]
    fn connect_reports_put_type() {
        let provider = provider();
        let (log, put) = start(&provider, "field(value)");
        assert_eq!(log.reports(), vec!["connect Ok"]);
        assert_eq!(log.put_type.lock().as_ref().map(|t| t.field_count()), Some(2));
        assert_eq!(put.channel().map(|c| c.channel_name()), Some("double01".to_owned()));

        let (log, _put) = start(&provider, "field(bogus)");
        assert_eq!(log.reports(), vec!["connect Error: no field 'bogus'"]);
        assert!(log.put_type.lock().is_none());
    }

    /// Fetching returns the current value, fully valid
    #[test]
    fn get_current_value() {
        let provider = provider();
        let (log, put) = start(&provider, "field()");
        put.get();
        assert_eq!(log.reports(), vec!["connect Ok", "get Ok"]);
        let (value, valid) = log.fetched.lock().clone().unwrap();
        assert_eq!(value.scalar("value"), Some(&ScalarValue::Double(1.0)));
        assert_eq!(value.scalar("descriptor").and_then(ScalarValue::as_str), Some("test record"));
        assert_eq!(valid, BitSet::full(3));
    }

    /// Writes only change the masked fields
    #[test]
    fn write_applies_mask() {
        let provider = provider();
        let (log, put) = start(&provider, "field(value)");
        write(&put, &log, "2.5");
        assert_eq!(log.reports(), vec!["connect Ok", "put Ok"]);
        let record = provider.read("double01").unwrap();
        assert_eq!(record.scalar("value"), Some(&ScalarValue::Double(2.5)));
        assert_eq!(record.scalar("descriptor").and_then(ScalarValue::as_str), Some("test record"));
        assert_eq!(provider.write_count("double01"), 1);
    }

    /// Injected failures are reported and nothing is written
    #[test]
    fn failing_writes() {
        let provider = provider();
        provider.fail_writes("double01", Some(Status::error("put disabled")));
        let (log, put) = start(&provider, "field(value)");
        write(&put, &log, "2.5");
        assert_eq!(log.reports(), vec!["connect Ok", "put Error: put disabled"]);
        assert_eq!(provider.write_count("double01"), 0);
    }

    /// Held writes are acknowledged on release, unless cancelled
    #[test]
    fn held_writes() {
        let provider = provider();
        provider.hold_writes("double01", true);
        let (log, put) = start(&provider, "field(value)");
        write(&put, &log, "2.5");
        assert_eq!(log.reports(), vec!["connect Ok"]);
        provider.release_writes("double01");
        assert_eq!(log.reports(), vec!["connect Ok", "put Ok"]);

        let (log, put) = start(&provider, "field(value)");
        write(&put, &log, "7.0");
        put.cancel();
        provider.release_writes("double01");
        assert_eq!(log.reports(), vec!["connect Ok"]);
        assert_eq!(provider.read("double01").unwrap().scalar("value"),
                   Some(&ScalarValue::Double(2.5)));
    }

    /// Disconnects reach every live sub-operation and drop held writes
    #[test]
    fn disconnect() {
        let provider = provider();
        provider.hold_writes("double01", true);
        let (log, put) = start(&provider, "field(value)");
        write(&put, &log, "2.5");
        provider.disconnect("double01");
        provider.release_writes("double01");
        assert_eq!(log.reports(), vec!["connect Ok", "disconnect false"]);
        assert_eq!(provider.write_count("double01"), 0);

        let (log, _put) = start(&provider, "field(value)");
        assert_eq!(log.reports(), vec!["connect Error: Channel not connected"]);

        provider.reconnect("double01");
        let (log, _put) = start(&provider, "field(value)");
        assert_eq!(log.reports(), vec!["connect Ok"]);
    }

    /// Sub-operations do not keep their requester alive
    #[test]
    fn weak_requester() {
        let provider = provider();
        let (log, put) = start(&provider, "field(value)");
        let put_type = log.put_type.lock().clone().unwrap();
        drop(log);
        // Nobody to tell, nothing to crash
        put.put(PVStructure::new(&put_type), BitSet::new());
        assert_eq!(provider.write_count("double01"), 0);
    }

    /// Sub-operations keep their channel alive
    #[test]
    fn put_keeps_channel() {
        let provider = provider();
        let channel = provider.connect("double01").unwrap();
        let log = Arc::new(Log::default());
        let put = channel.create_channel_put(log.clone(), &PvRequest::all());
        let weak_channel = Arc::downgrade(&channel);
        drop(channel);
        assert_eq!(put.channel().map(|c| c.channel_name()), Some("double01".to_owned()));

        // ...until the sub-operation itself goes away
        drop(put);
        assert!(weak_channel.upgrade().is_none());
    }
}
