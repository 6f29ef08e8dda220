use async_trait::async_trait;
use mockito::Matcher;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_modbus::{
    prelude::*,
    server::{
        tcp::{accept_tcp_connection, Server},
        Service,
    },
};

use clap::Parser;
use sma_watch::{
    api,
    error::SinkError,
    scheduler::{FlushReport, StepOutcome},
    Config, ConnectionSlot, Connector, GatewayPath, GatewayQuery, ModbusTcpConnector, Scheduler,
    SharedSnapshot, Sink, SnapshotRow, WebboxClient,
};

/// Mock SMA Sunny Boy Modbus server holding raw U32 register values
#[derive(Clone)]
struct MockInverter {
    registers: Arc<Mutex<HashMap<u16, u32>>>,
    read_count: Arc<AtomicU32>,
    should_fail: Arc<AtomicBool>,
}

impl MockInverter {
    fn new() -> Self {
        Self {
            registers: Arc::new(Mutex::new(HashMap::new())),
            read_count: Arc::new(AtomicU32::new(0)),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Loads strings A, B and C with raw (device scaled) amps, volts and watts
    fn set_strings(&self, strings: [(u32, u32, u32); 3]) {
        let map = sma_watch::RegisterMap::SUNNY_BOY;
        let mut registers = self.registers.lock().unwrap();
        for (spec, (amps, volts, watts)) in map.strings.iter().zip(strings) {
            registers.insert(spec.current.register, amps);
            registers.insert(spec.voltage.register, volts);
            registers.insert(spec.power.register, watts);
        }
    }

    fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    fn get_read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

impl Service for MockInverter {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Exception>> + Send>,
    >;

    fn call(&self, req: Self::Request) -> Self::Future {
        let registers = self.registers.clone();
        let read_count = self.read_count.clone();
        let should_fail = self.should_fail.clone();

        Box::pin(async move {
            read_count.fetch_add(1, Ordering::Relaxed);

            if should_fail.load(Ordering::Relaxed) {
                return Err(ExceptionCode::ServerDeviceFailure);
            }

            match req {
                Request::ReadInputRegisters(addr, 2) => {
                    match registers.lock().unwrap().get(&addr).copied() {
                        // U32, high word first
                        Some(raw) => Ok(Response::ReadInputRegisters(vec![
                            (raw >> 16) as u16,
                            (raw & 0xFFFF) as u16,
                        ])),
                        None => Err(ExceptionCode::IllegalDataAddress),
                    }
                }
                _ => Err(ExceptionCode::IllegalFunction),
            }
        })
    }
}

/// Start a mock inverter Modbus server
async fn start_mock_inverter() -> (MockInverter, SocketAddr, oneshot::Sender<()>) {
    let mock_server = MockInverter::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_clone = mock_server.clone();

    tokio::spawn(async move {
        let server = Server::new(listener);
        let new_service = |_socket_addr| Ok(Some(server_clone.clone()));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            eprintln!("Mock inverter server error: {}", err);
        };

        tokio::select! {
            _ = server.serve(&on_connected, on_process_error) => {},
            _ = shutdown_rx => {
                println!("Mock inverter server shutting down");
            }
        }
    });

    (mock_server, addr, shutdown_tx)
}

/// Mock WebBox answering GetDevices and GetProcessData
async fn start_mock_webbox(channels: &str) -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/rpc")
        .match_body(Matcher::Regex(r#""proc":"GetDevices""#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"format":"JSON","proc":"GetDevices","version":"1.0","id":"1",
                "result":{"totalDevicesReturned":2,"devices":[
                    {"key":"SENS0700:12345","name":"SENS0700:12345"},
                    {"key":"WR21TL06:2001234567","name":"WRTU1:2001234567"}]}}"#,
        )
        .create_async()
        .await;
    server
        .mock("POST", "/rpc")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""proc":"GetProcessData""#.to_string()),
            Matcher::Regex(r#""key":"WR21TL06:2001234567""#.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"format":"JSON","proc":"GetProcessData","version":"1.0","id":"2",
                "result":{{"devices":[{{"key":"WR21TL06:2001234567","channels":[{channels}]}}]}}}}"#
        ))
        .create_async()
        .await;
    server
}

fn channel(meta: &str, value: &str) -> String {
    format!(r#"{{"meta":"{meta}","name":"{meta}","value":"{value}","unit":""}}"#)
}

/// Sink keeping every row in memory
#[derive(Clone, Default)]
struct RecordingSink {
    rows: Arc<Mutex<Vec<SnapshotRow>>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write(&mut self, row: &SnapshotRow) -> Result<u64, SinkError> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(1)
    }
}

struct Plant {
    inverters: Vec<MockInverter>,
    _shutdown: Vec<oneshot::Sender<()>>,
    _webbox: mockito::ServerGuard,
    scheduler: Scheduler,
    snapshot: SharedSnapshot,
    sink: RecordingSink,
}

async fn start_plant(webbox_channels: &str, flush_ticks: u32) -> Plant {
    let mut inverters = Vec::new();
    let mut addresses = Vec::new();
    let mut shutdown = Vec::new();
    for _ in 0..3 {
        let (inverter, addr, tx) = start_mock_inverter().await;
        inverters.push(inverter);
        addresses.push(addr.to_string());
        shutdown.push(tx);
    }
    let webbox = start_mock_webbox(webbox_channels).await;

    let flush = flush_ticks.to_string();
    let inverter_list = addresses.join(",");
    let webbox_url = webbox.url();
    let config = Config::try_parse_from([
        "sma_watch",
        "--inverter",
        inverter_list.as_str(),
        "--webbox-url",
        webbox_url.as_str(),
        "--flush-ticks",
        flush.as_str(),
        "--io-timeout-ms",
        "1000",
    ])
    .unwrap();

    let connector: Arc<dyn Connector> = Arc::new(ModbusTcpConnector::new(config.io_timeout()));
    let slots = config
        .device_groups()
        .unwrap()
        .into_iter()
        .map(|group| ConnectionSlot::new(group, connector.clone()))
        .collect();

    let query: Arc<dyn GatewayQuery> =
        Arc::new(WebboxClient::new(&config.webbox_url, config.io_timeout()).unwrap());
    let gateway = GatewayPath::resolve(
        query,
        &config.webbox_device,
        config.gateway_sources().unwrap(),
    )
    .await;
    assert!(gateway.is_some(), "WRTU device should be found");

    let snapshot = SharedSnapshot::new();
    let sink = RecordingSink::default();
    let scheduler = Scheduler::new(
        slots,
        gateway,
        Some(Box::new(sink.clone())),
        snapshot.clone(),
        config.tick_period(),
        config.flush_ticks,
    );

    Plant {
        inverters,
        _shutdown: shutdown,
        _webbox: webbox,
        scheduler,
        snapshot,
        sink,
    }
}

fn all_gateway_channels() -> String {
    [
        channel("A.Ms.Amp", "4.5"),
        channel("A.Ms.Vol", "310"),
        channel("A.Ms.Watt", "1395"),
        channel("B.Ms.Amp", "3.25"),
        channel("B.Ms.Vol", "300.5"),
        channel("B.Ms.Watt", "977"),
    ]
    .join(",")
}

#[tokio::test]
async fn test_full_cycle() {
    let mut plant = start_plant(&all_gateway_channels(), 3).await;
    plant.inverters[0].set_strings([
        (8_250, 34_512, 2_847),
        (7_100, 33_000, 2_343),
        (0, 0, 0),
    ]);
    plant.inverters[1].set_strings([(5_000, 30_000, 1_500); 3]);
    // 0xFFFFFFFF is the SMA "no value" marker
    plant.inverters[2].set_strings([
        (1_000, 20_000, 200),
        (0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF),
        (2_000, 20_000, 400),
    ]);

    // Test 1: register reads land in the snapshot every tick
    let report = plant.scheduler.tick().await;
    assert_eq!(report.slots_ok, 3);
    assert!(report.flush.is_none());

    let view = plant.snapshot.read_all();
    assert!((view.strings[0].current - 8.25).abs() < 1e-9);
    assert!((view.strings[0].voltage - 345.12).abs() < 1e-9);
    assert_eq!(view.strings[0].power, 2847.0);
    assert_eq!(view.strings[4].power, 1500.0);
    assert_eq!(view.strings[7].power, 0.0);
    assert_eq!(view.strings[7].voltage, 0.0);
    assert_eq!(view.strings[8].power, 400.0);
    // Gateway strings untouched until the flush tick
    assert_eq!(view.strings[9].power, 0.0);
    assert!(plant.sink.rows.lock().unwrap().is_empty());

    println!("✅ Test 1 passed: Register reads ({}W)", view.total);

    // Test 2: flush tick queries the WebBox and writes one full row
    plant.scheduler.tick().await;
    let report = plant.scheduler.tick().await;
    assert_eq!(
        report.flush,
        Some(FlushReport {
            gateway: StepOutcome::Ok,
            sink: StepOutcome::Ok
        })
    );

    let view = plant.snapshot.read_all();
    assert_eq!(view.strings[9].power, 1395.0);
    assert_eq!(view.strings[10].current, 3.25);
    let expected_total = 2847.0 + 2343.0 + 4500.0 + 200.0 + 400.0 + 1395.0 + 977.0;
    assert!((view.total - expected_total).abs() < 1e-9);

    let rows = plant.sink.rows.lock().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values.len(), 33);
    assert_eq!(rows[0].values[2], 2847.0);
    assert_eq!(rows[0].values[30..33], [3.25, 300.5, 977.0]);

    println!("✅ Test 2 passed: Flush cycle ({}W)", view.total);

    // Test 3: the connection is kept open between ticks
    let reads = plant.inverters[1].get_read_count();
    assert_eq!(reads, 27, "three ticks of nine reads");
}

#[tokio::test]
async fn test_inverter_failure_and_recovery() {
    let mut plant = start_plant(&all_gateway_channels(), 15).await;
    for inverter in &plant.inverters {
        inverter.set_strings([(1_000, 30_000, 300); 3]);
    }
    plant.scheduler.tick().await;
    assert_eq!(plant.snapshot.read_all().total, 2700.0);

    // New values appear but the device starts failing every request
    plant.inverters[1].set_strings([(2_000, 30_000, 600); 3]);
    plant.inverters[1].set_should_fail(true);

    for _ in 0..5 {
        let report = plant.scheduler.tick().await;
        assert_eq!(report.slots_ok, 2);
        assert_eq!(report.slots_failed, 1);
        let view = plant.snapshot.read_all();
        for i in 3..6 {
            assert_eq!(view.strings[i].power, 300.0, "stale value kept for {i}");
        }
    }

    plant.inverters[1].set_should_fail(false);
    let report = plant.scheduler.tick().await;
    assert_eq!(report.slots_ok, 3);
    assert_eq!(plant.snapshot.read_all().total, 1800.0 + 1800.0);

    println!("✅ Test passed: Recovery after inverter failure");
}

#[tokio::test]
async fn test_partial_gateway_response() {
    let channels = [
        channel("A.Ms.Amp", "4.5"),
        channel("A.Ms.Vol", "310"),
        channel("A.Ms.Watt", "1395"),
        channel("B.Ms.Amp", "3.25"),
        channel("B.Ms.Vol", "300.5"),
    ]
    .join(",");
    let mut plant = start_plant(&channels, 1).await;

    let report = plant.scheduler.tick().await;
    assert_eq!(report.flush.map(|f| f.gateway), Some(StepOutcome::Ok));

    let view = plant.snapshot.read_all();
    assert_eq!(view.strings[10].power, 0.0);
    assert_eq!(view.strings[10].current, 3.25);
    assert_eq!(view.strings[10].voltage, 300.5);
}

#[tokio::test]
async fn test_read_api_serves_snapshot() {
    let mut plant = start_plant(&all_gateway_channels(), 1).await;
    plant.inverters[0].set_strings([(1_000, 30_000, 300), (0, 0, 0), (0, 0, 0)]);
    plant.scheduler.tick().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(api::serve(listener, plant.snapshot.clone()));

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        reqwest::get(format!("http://{addr}/")),
    )
    .await
    .expect("Timeout waiting for API response")
    .expect("API request failed");
    assert_eq!(response.status(), 200);

    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["strings"].as_array().unwrap().len(), 11);
    assert_eq!(json["strings"][0]["watts"], 300.0);
    assert_eq!(json["strings"][0]["volts"], 300.0);
    assert_eq!(json["strings"][0]["amps"], 1.0);
    assert_eq!(json["strings"][9]["watts"], 1395.0);
    assert_eq!(json["total"], 300.0 + 1395.0 + 977.0);
}
