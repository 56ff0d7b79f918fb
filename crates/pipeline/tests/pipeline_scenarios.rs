//! End-to-end pipeline scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{json, Value};
use telemetry_types::{Event, EventGroup, LogEvent, Timestamp};

use pipeline::{
    AlarmKind, ExtendedRuntime, MetricsRecord, PipelineConfig, PipelineContext, PipelineError,
    PluginMeta, PushResult, QueueKey, Runtime, RuntimeOptions, Sink, SinkRequest, SinkTransport,
};

/// Transport that remembers every batch it delivers.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<Vec<EventGroup>>>,
}

impl RecordingTransport {
    fn delivered_events(&self) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(EventGroup::event_count)
            .sum()
    }

    fn first_group(&self) -> EventGroup {
        let delivered = self.delivered.lock().unwrap();
        delivered[0][0].copy()
    }
}

impl SinkTransport for RecordingTransport {
    fn deliver(&self, request: &SinkRequest) -> bool {
        let groups: Vec<EventGroup> = request.groups.iter().map(EventGroup::copy).collect();
        self.delivered.lock().unwrap().push(groups);
        true
    }
}

/// Sink that captures the exact groups it is handed, preserving buffer
/// identity so move-vs-copy semantics are observable.
#[derive(Default)]
struct CaptureSink {
    label: String,
    store: Arc<Mutex<Vec<(String, EventGroup)>>>,
    queue_key: OnceLock<QueueKey>,
}

impl CaptureSink {
    const NAME: &'static str = "sink_capture";
}

impl Sink for CaptureSink {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(
        &mut self,
        detail: &Value,
        _ctx: &Arc<PipelineContext>,
        _meta: PluginMeta,
        _metrics: MetricsRecord,
    ) -> Result<Option<Value>, PipelineError> {
        self.label = detail
            .get("Label")
            .and_then(Value::as_str)
            .unwrap_or("capture")
            .to_string();
        Ok(None)
    }

    fn start(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn stop(&self, _is_removing: bool) -> Result<(), PipelineError> {
        Ok(())
    }

    fn send(&self, group: EventGroup) -> Result<(), PipelineError> {
        self.store.lock().unwrap().push((self.label.clone(), group));
        Ok(())
    }

    fn flush_all(&self) -> bool {
        true
    }

    fn queue_key(&self) -> Option<QueueKey> {
        self.queue_key.get().copied()
    }
}

/// Extended runtime that records loads and unloads.
#[derive(Default)]
struct RecordingExtendedRuntime {
    loads: Mutex<Vec<(String, Value)>>,
    unloads: Mutex<Vec<String>>,
    reject: AtomicBool,
}

impl RecordingExtendedRuntime {
    fn loaded_ids(&self) -> Vec<String> {
        self.loads.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn loaded_value(&self, id: &str) -> Option<Value> {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .find(|(loaded, _)| loaded == id)
            .map(|(_, v)| v.clone())
    }
}

impl ExtendedRuntime for RecordingExtendedRuntime {
    fn load_pipeline(
        &self,
        id: &str,
        pipeline: &Value,
        _project: &str,
        _logstore: &str,
        _region: &str,
        _logstore_key: u64,
    ) -> bool {
        if self.reject.load(Ordering::SeqCst) {
            return false;
        }
        self.loads
            .lock()
            .unwrap()
            .push((id.to_string(), pipeline.clone()));
        true
    }

    fn unload_pipeline(&self, id: &str) -> bool {
        self.unloads.lock().unwrap().push(id.to_string());
        true
    }
}

fn group_with_content(content: &str) -> EventGroup {
    let mut group = EventGroup::new();
    let value = group.copy_string(content);
    let mut log = LogEvent::new(Timestamp::from_secs(1383224629));
    log.set_content_no_copy(Bytes::from_static(b"content"), value);
    group.push_event(Event::Log(log));
    group
}

fn log_keys(group: &EventGroup) -> Vec<String> {
    group.events()[0]
        .as_log()
        .unwrap()
        .content_keys()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .collect()
}

fn log_content<'a>(group: &'a EventGroup, key: &str) -> &'a [u8] {
    group.events()[0]
        .as_log()
        .unwrap()
        .content(key)
        .map(|v| v.as_ref())
        .unwrap_or(b"<missing>")
}

/// Surfaces `tracing` output when tests run with `--nocapture`. Only the
/// first call installs the subscriber.
fn init_logging() {
    let _unused = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// S1: a single native path end to end, from the process queue through the
/// delimiter processor into the remote sink's transport.
#[test]
fn scenario_single_native_path() {
    init_logging();
    let transport = Arc::new(RecordingTransport::default());
    let runtime = Arc::new(
        Runtime::new(RuntimeOptions {
            remote_transport: transport.clone(),
            ..RuntimeOptions::default()
        })
        .unwrap(),
    );
    runtime.start();

    runtime
        .load_pipeline(json!({
            "name": "access-logs",
            "createTime": 1700000000,
            "inputs": [
                {"Type": "input_file", "FilePaths": ["/var/log/app.log"]}
            ],
            "processors": [
                {"Type": "processor_parse_delimiter", "SourceKey": "content",
                 "Separator": ",", "Keys": ["time", "method", "url", "request_time"],
                 "KeepingSourceWhenParseSucceed": false}
            ],
            "flushers": [
                {"Type": "sink_remote_store", "Project": "p", "Logstore": "l",
                 "MaxBatchEvents": 1}
            ]
        }))
        .unwrap();

    let group = group_with_content(
        "2013-10-31 21:03:49,POST,PutData?Category=YunOsAccountOpLog,0.024",
    );
    assert_eq!(
        runtime.push_group("access-logs", group, 0).unwrap(),
        PushResult::Pushed
    );

    assert!(
        wait_until(Duration::from_secs(5), || transport.delivered_events() == 1),
        "event never reached the transport"
    );
    let delivered = transport.first_group();
    assert_eq!(
        log_keys(&delivered),
        vec!["time", "method", "url", "request_time"]
    );
    assert_eq!(log_content(&delivered, "time"), b"2013-10-31 21:03:49");
    assert_eq!(log_content(&delivered, "method"), b"POST");
    assert_eq!(
        log_content(&delivered, "url"),
        b"PutData?Category=YunOsAccountOpLog"
    );
    assert_eq!(log_content(&delivered, "request_time"), b"0.024");

    runtime.shutdown();
}

/// S2: a quoted-delimiter parse failure keeps the raw content and counts a
/// parse error.
#[test]
fn scenario_quoted_failure_kept() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    runtime
        .load_pipeline(json!({
            "name": "quoted",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "processors": [
                {"Type": "processor_parse_delimiter", "SourceKey": "content",
                 "Separator": ",", "Quote": "'",
                 "Keys": ["time", "method", "url", "request_time"],
                 "KeepingSourceWhenParseFail": true, "CopingRawLog": true}
            ],
            "flushers": [{"Type": "sink_blackhole"}]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("quoted").unwrap();
    let line = "2013-10-31 21:03:49,POST,'PutData?Category=YunOs'AccountOpLog',0.024";
    let mut groups = vec![group_with_content(line)];
    pipeline.process(&mut groups, 0);

    assert_eq!(groups[0].event_count(), 1);
    assert_eq!(log_content(&groups[0], "__raw_log__"), line.as_bytes());
    assert_eq!(
        pipeline.processors()[0].metrics().value("parse_error_total"),
        1
    );
    runtime.shutdown();
}

/// S3: exactly-once with a second non-file input is rejected at init with no
/// queue key reserved and a config alarm emitted.
#[test]
fn scenario_exactly_once_rejected() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    let result = runtime.load_pipeline(json!({
        "name": "exactly-once",
        "inputs": [
            {"Type": "input_file", "FilePaths": ["/var/log/app.log"],
             "ExactlyOnceConcurrency": 4},
            {"Type": "input_container_stdio"}
        ],
        "flushers": [
            {"Type": "sink_remote_store", "Project": "p", "Logstore": "l"}
        ]
    }));

    assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
    assert!(runtime.pipeline("exactly-once").is_none());
    // No process queue key reserved, and the sink queue key was rolled back.
    assert!(!runtime
        .services()
        .key_manager
        .contains_name("exactly-once"));
    assert!(!runtime
        .services()
        .key_manager
        .contains_name("exactly-once/p#l#"));
    let alarms: Vec<_> = runtime.alarms().drain().collect();
    assert!(alarms.iter().any(|a| a.kind == AlarmKind::ConfigError));
}

/// S4: the backpressure handshake between a bounded process queue and a full
/// downstream sink queue.
#[test]
fn scenario_backpressure_handshake() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    runtime
        .load_pipeline(json!({
            "name": "bp",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "flushers": [
                {"Type": "sink_remote_store", "Project": "p", "Logstore": "l",
                 "QueueCapacity": 1}
            ]
        }))
        .unwrap();

    let services = runtime.services();
    let pipeline = runtime.pipeline("bp").unwrap();
    let process_key = pipeline.context().process_queue_key().unwrap();
    services.process_queues.set_bounded_capacity(process_key, 2);
    let sink_key = pipeline.sinks()[0].queue_key().unwrap();

    // Block the downstream queue.
    assert_eq!(
        services
            .sink_queues
            .push(sink_key, SinkRequest::new("bp", vec![]))
            .unwrap(),
        PushResult::Pushed
    );
    assert!(!services.sink_queues.available(sink_key));

    assert_eq!(
        runtime.push_group("bp", EventGroup::new(), 0).unwrap(),
        PushResult::Pushed
    );
    assert_eq!(
        runtime.push_group("bp", EventGroup::new(), 0).unwrap(),
        PushResult::Pushed
    );
    assert_eq!(
        runtime.push_group("bp", EventGroup::new(), 0).unwrap(),
        PushResult::Backpressured
    );

    // The full sink queue gates the process queue.
    assert!(services.process_queues.try_pop().is_none());

    // Downstream drains and signals available; the consumer can pop again
    // and the producer's next push is accepted.
    services.sink_queues.flush_queue(sink_key);
    assert!(services.sink_queues.available(sink_key));
    assert!(services.process_queues.try_pop().is_some());
    assert_eq!(
        runtime.push_group("bp", EventGroup::new(), 0).unwrap(),
        PushResult::Pushed
    );
}

/// S5 and properties 3/4: fan-out delivers deep copies to non-terminal sinks
/// and moves the original into the last one.
#[test]
fn scenario_fanout_routing() {
    let store: Arc<Mutex<Vec<(String, EventGroup)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    {
        let store = store.clone();
        runtime
            .registry_mut()
            .register_sink(CaptureSink::NAME, move || {
                Box::new(CaptureSink {
                    store: store.clone(),
                    ..CaptureSink::default()
                }) as Box<dyn Sink>
            })
            .unwrap();
    }
    runtime
        .load_pipeline(json!({
            "name": "fanout",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "flushers": [
                {"Type": "sink_capture", "Label": "first"},
                {"Type": "sink_capture", "Label": "second"}
            ],
            "router": [
                {"Matcher": {"Type": "always"}, "Sink": 0},
                {"Matcher": {"Type": "always"}, "Sink": 1}
            ]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("fanout").unwrap();
    let group = group_with_content("hello");
    let original_ptr = group.events()[0]
        .as_log()
        .unwrap()
        .content("content")
        .unwrap()
        .as_ptr();

    assert!(pipeline.send(vec![group]));

    let mut captured = store.lock().unwrap();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].0, "first");
    assert_eq!(captured[1].0, "second");

    let first_ptr = captured[0].1.events()[0]
        .as_log()
        .unwrap()
        .content("content")
        .unwrap()
        .as_ptr();
    let second_ptr = captured[1].1.events()[0]
        .as_log()
        .unwrap()
        .content("content")
        .unwrap()
        .as_ptr();
    // The non-terminal target received a deep copy, the last one the moved
    // original.
    assert_ne!(first_ptr, original_ptr);
    assert_eq!(second_ptr, original_ptr);
    assert_eq!(log_content(&captured[0].1, "content"), b"hello");
    assert_eq!(log_content(&captured[1].1, "content"), b"hello");

    // Mutating one copy does not affect the other.
    captured[0]
        .1
        .events_mut()[0]
        .as_log_mut()
        .unwrap()
        .set_content("content", "changed");
    assert_eq!(log_content(&captured[1].1, "content"), b"hello");
}

/// Property 3: a single match-all route moves the group into the only sink
/// without copying.
#[test]
fn single_sink_send_moves_ownership() {
    let store: Arc<Mutex<Vec<(String, EventGroup)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    {
        let store = store.clone();
        runtime
            .registry_mut()
            .register_sink(CaptureSink::NAME, move || {
                Box::new(CaptureSink {
                    store: store.clone(),
                    ..CaptureSink::default()
                }) as Box<dyn Sink>
            })
            .unwrap();
    }
    runtime
        .load_pipeline(json!({
            "name": "single",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "flushers": [{"Type": "sink_capture"}]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("single").unwrap();
    let group = group_with_content("payload");
    let original_ptr = group.events()[0]
        .as_log()
        .unwrap()
        .content("content")
        .unwrap()
        .as_ptr();
    assert!(pipeline.send(vec![group]));

    let captured = store.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let delivered_ptr = captured[0].1.events()[0]
        .as_log()
        .unwrap()
        .content("content")
        .unwrap()
        .as_ptr();
    assert_eq!(delivered_ptr, original_ptr);
}

/// S6: stopping a pipeline without removal flushes every sink once, clears
/// its timeout flush records, and returns within the soft deadline.
#[test]
fn scenario_shutdown_flushes() {
    init_logging();
    let transport = Arc::new(RecordingTransport::default());
    let runtime = Runtime::new(RuntimeOptions {
        remote_transport: transport.clone(),
        stop_deadline: Duration::from_secs(3),
        ..RuntimeOptions::default()
    })
    .unwrap();
    runtime
        .load_pipeline(json!({
            "name": "drain",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "flushers": [
                {"Type": "sink_remote_store", "Project": "p", "Logstore": "l",
                 "FlushIntervalSecs": 3600}
            ]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("drain").unwrap();
    let sink_key = pipeline.sinks()[0].queue_key().unwrap();
    let services = runtime.services();

    // Batch three groups without reaching any flush threshold.
    for _ in 0..3 {
        let mut groups = vec![group_with_content("a,b")];
        pipeline.process(&mut groups, 0);
        assert!(pipeline.send(groups));
    }
    assert_eq!(services.flush_manager.pending("drain"), 1);
    assert_eq!(services.sink_queues.get_queue(sink_key).unwrap().depth(), 0);

    let clears_before = services.flush_manager.clear_invocations();
    let started = Instant::now();
    runtime.stop_pipeline("drain", false).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    // One flush moved the whole batch into the sink queue, and the records
    // were cleared exactly once.
    assert_eq!(services.sink_queues.get_queue(sink_key).unwrap().depth(), 1);
    assert_eq!(services.flush_manager.pending("drain"), 0);
    assert_eq!(services.flush_manager.clear_invocations() - clears_before, 1);
}

/// Property 6: mixed ack capability across inputs fails init.
#[test]
fn mixed_ack_capability_rejected() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    let result = runtime.load_pipeline(json!({
        "name": "mixed-ack",
        "inputs": [
            {"Type": "input_file", "FilePaths": ["/var/log/app.log"]},
            {"Type": "input_container_stdio"}
        ],
        "flushers": [{"Type": "sink_blackhole"}]
    }));
    assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
    assert!(!runtime.services().key_manager.contains_name("mixed-ack"));
}

/// Property 9: stopping twice is safe; the second call is a no-op.
#[test]
fn stop_is_idempotent() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    runtime
        .load_pipeline(json!({
            "name": "idem",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "flushers": [{"Type": "sink_blackhole"}]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("idem").unwrap();
    let clears_before = runtime.services().flush_manager.clear_invocations();
    pipeline.stop(false);
    pipeline.stop(false);
    assert_eq!(
        runtime.services().flush_manager.clear_invocations() - clears_before,
        1
    );
}

/// Delegation: unknown plugins are serialized into the extended
/// sub-pipelines, global params propagate, and ids follow the /1 and /2
/// convention.
#[test]
fn extended_delegation_and_globals() {
    init_logging();
    let extended = Arc::new(RecordingExtendedRuntime::default());
    let runtime = Runtime::new(RuntimeOptions {
        extended: extended.clone(),
        ..RuntimeOptions::default()
    })
    .unwrap();
    runtime
        .load_pipeline(json!({
            "name": "mixed",
            "global": {
                "EnableTimestampNanosecond": true,
                "DefaultLogQueueSize": 256
            },
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "processors": [{"Type": "processor_extended_regex", "Pattern": ".*"}],
            "aggregators": [{"Type": "aggregator_context"}],
            "flushers": [{"Type": "sink_blackhole"}],
            "extensions": [{"Type": "ext_basicauth"}]
        }))
        .unwrap();

    // A native input claimed the head of the flow, so everything delegated
    // went to the without-input sub-pipeline.
    assert_eq!(extended.loaded_ids(), vec!["mixed/2"]);
    let sub = extended.loaded_value("mixed/2").unwrap();
    assert_eq!(sub["processors"][0]["type"], json!("processor_extended_regex"));
    assert_eq!(sub["aggregators"][0]["type"], json!("aggregator_context"));
    assert_eq!(sub["extensions"][0]["type"], json!("ext_basicauth"));
    assert_eq!(sub["global"]["EnableTimestampNanosecond"], json!(true));
    assert_eq!(sub["global"]["UsingOldContentTag"], json!(false));
    // Unknown global keys pass through, and the tailing-input override wins.
    assert_eq!(sub["global"]["DefaultLogQueueSize"], json!(10));

    let pipeline = runtime.pipeline("mixed").unwrap();
    assert!(pipeline.is_flushing_through_extended());

    // Stop unloads the extended sub-pipeline.
    runtime.stop_pipeline("mixed", false).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        extended.unloads.lock().unwrap().contains(&"mixed/2".to_string())
    }));
}

/// Invariant 1: a failing native plugin aborts init before anything is
/// loaded into the extended runtime or any queue key is reserved.
#[test]
fn failed_native_init_loads_nothing() {
    let extended = Arc::new(RecordingExtendedRuntime::default());
    let runtime = Runtime::new(RuntimeOptions {
        extended: extended.clone(),
        ..RuntimeOptions::default()
    })
    .unwrap();
    let result = runtime.load_pipeline(json!({
        "name": "broken",
        "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
        "processors": [
            {"Type": "processor_extended_regex"},
            {"Type": "processor_parse_delimiter", "SourceKey": "content",
             "Separator": "::::", "Keys": ["a"]}
        ],
        "flushers": [{"Type": "sink_blackhole"}]
    }));

    assert!(result.is_err());
    assert!(extended.loaded_ids().is_empty());
    assert!(!runtime.services().key_manager.contains_name("broken"));
}

/// A rejected extended load rolls back the already-loaded sub-pipeline.
#[test]
fn extended_load_failure_rolls_back() {
    let extended = Arc::new(RecordingExtendedRuntime::default());
    extended.reject.store(true, Ordering::SeqCst);
    let runtime = Runtime::new(RuntimeOptions {
        extended: extended.clone(),
        ..RuntimeOptions::default()
    })
    .unwrap();
    let result = runtime.load_pipeline(json!({
        "name": "rejected",
        "inputs": [{"Type": "service_extended_syslog"}],
        "flushers": [{"Type": "sink_blackhole"}]
    }));

    assert!(matches!(result, Err(PipelineError::ExtendedLoad { .. })));
    assert!(!runtime.services().key_manager.contains_name("rejected"));
}

/// Property 2: the processor chain applies in declared order, inner input
/// processors first.
#[test]
fn processor_chain_order() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    runtime
        .load_pipeline(json!({
            "name": "chain",
            "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
            "processors": [
                {"Type": "processor_parse_delimiter", "SourceKey": "content",
                 "Separator": ",", "Keys": ["first", "second"]},
                {"Type": "processor_add_fields", "Fields": {"env": "prod"}}
            ],
            "flushers": [{"Type": "sink_blackhole"}]
        }))
        .unwrap();

    let pipeline = runtime.pipeline("chain").unwrap();
    let mut groups = vec![group_with_content("a,b")];
    pipeline.process(&mut groups, 0);
    assert_eq!(log_keys(&groups[0]), vec!["first", "second", "env"]);
}

/// The same config loaded twice must be stopped in between.
#[test]
fn duplicate_pipeline_name_rejected() {
    init_logging();
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    let config = json!({
        "name": "dup",
        "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
        "flushers": [{"Type": "sink_blackhole"}]
    });
    runtime.load_pipeline(config.clone()).unwrap();
    assert!(runtime.load_pipeline(config.clone()).is_err());

    runtime.stop_pipeline("dup", true).unwrap();
    runtime.load_pipeline(config).unwrap();
}

/// Duplicate sink destinations within one pipeline fail init.
#[test]
fn duplicate_sink_queue_key_rejected() {
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    let result = runtime.load_pipeline(json!({
        "name": "dup-sinks",
        "inputs": [{"Type": "input_file", "FilePaths": ["/var/log/app.log"]}],
        "flushers": [
            {"Type": "sink_remote_store", "Project": "p", "Logstore": "l"},
            {"Type": "sink_remote_store", "Project": "p", "Logstore": "l"}
        ]
    }));
    assert!(result.is_err());
    assert!(!runtime
        .services()
        .key_manager
        .contains_name("dup-sinks/p#l#"));
}

/// Non-ack inputs get a circular process queue that evicts under overflow.
#[test]
fn non_ack_input_gets_circular_queue() {
    init_logging();
    let runtime = Runtime::new(RuntimeOptions::default()).unwrap();
    runtime
        .load_pipeline(json!({
            "name": "stdio",
            "inputs": [{"Type": "input_container_stdio"}],
            "flushers": [{"Type": "sink_blackhole"}]
        }))
        .unwrap();

    // The circular queue accepts pushes beyond capacity by evicting.
    for _ in 0..100 {
        assert_eq!(
            runtime.push_group("stdio", EventGroup::new(), 0).unwrap(),
            PushResult::Pushed
        );
    }
    assert_eq!(
        runtime.push_group("stdio", EventGroup::new(), 0).unwrap(),
        PushResult::Evicted
    );
    runtime.shutdown();
}

/// Parsed config mirrors the external tree shape.
#[test]
fn config_round_trip_shapes() {
    let config = PipelineConfig::from_value(json!({
        "name": "shape",
        "inputs": [{"Type": "input_file", "FilePaths": ["/a"]}],
        "processors": [],
        "flushers": [{"Type": "sink_blackhole"}],
        "router": [{"Matcher": {"Type": "always"}, "Sink": 0}]
    }))
    .unwrap();
    assert_eq!(config.name, "shape");
    assert!(config.router.is_some());
}
