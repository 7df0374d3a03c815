//! Integration tests for the acquisition loop driving a scripted device.

use loadrig_daq::acquisition::{AcquisitionLoop, IterationOutcome, LoopPhase};
use loadrig_daq::device::scripted::ScriptedConnector;
use loadrig_daq::device::{DeviceLink, SerialSettings, SharedDevice};
use loadrig_daq::error::{ConnectionFailure, Precondition};
use loadrig_daq::metadata::{MetadataValidator, RequiredFields, TestMetadata};
use loadrig_daq::sample::RegisterPair;
use loadrig_daq::sampling::AcceptReason;
use loadrig_daq::session::{SessionStateStore, SharedSession, StateKey, StateValue};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    connector: ScriptedConnector,
    device: SharedDevice,
    session: SharedSession,
}

impl Rig {
    fn new(readings: &[(u16, u16)]) -> Self {
        let connector = ScriptedConnector::with_readings(
            readings.iter().map(|&(high, low)| RegisterPair::new(high, low)),
        );
        let session = SessionStateStore::default().into_shared();
        let device =
            DeviceLink::new(Arc::new(connector.clone()), Arc::clone(&session)).into_shared();
        Self {
            connector,
            device,
            session,
        }
    }

    async fn connect(&self) {
        self.device
            .lock()
            .await
            .connect("/dev/ttyUSB0", &SerialSettings::default())
            .await
            .expect("scripted connect");
    }

    fn acquisition(&self, validator: Arc<dyn MetadataValidator>) -> AcquisitionLoop {
        AcquisitionLoop::new(
            Arc::clone(&self.device),
            Arc::clone(&self.session),
            validator,
        )
    }
}

fn accept_all() -> Arc<dyn MetadataValidator> {
    Arc::new(|_: &TestMetadata| true)
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_register_scenario() {
    let rig = Rig::new(&[(0, 500), (0, 501), (0, 700)]);
    rig.connect().await;

    let accepted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&accepted);
    rig.session.lock().subscribe(move |key, value| {
        if *key == StateKey::LastAcceptedSample {
            if let StateValue::Sample(Some(sample)) = value {
                sink.lock().push(sample.load_tons());
            }
        }
    });

    let mut acq = rig.acquisition(accept_all());
    acq.start().unwrap();
    // reads at 0, 1000 and 2000 ms
    tokio::time::sleep(Duration::from_millis(2500)).await;
    acq.stop().await.unwrap();

    let session = rig.session.lock();
    let samples = session.samples();
    assert_eq!(samples.len(), 2);

    assert_eq!(samples[0].registers().combined(), 500);
    assert_eq!(samples[0].load_kg(), 5000.0);
    assert_eq!(samples[0].load_tons(), 5.0);
    assert!((samples[0].load_kn() - 49.03325).abs() < 1e-9);

    assert_eq!(samples[1].load_tons(), 7.0);
    assert_eq!(session.peak_value(), 7.0);
    assert_eq!(*accepted.lock(), vec![5.0, 7.0]);
    assert_eq!(rig.connector.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_steady_load_produces_single_heartbeat() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connect().await;

    let mut acq = rig.acquisition(accept_all());
    let mut outcomes = acq.subscribe_outcomes();
    acq.start().unwrap();
    // reads at 0, 1000, ..., 6000 ms
    tokio::time::sleep(Duration::from_millis(6500)).await;
    acq.stop().await.unwrap();

    let mut heartbeats = 0;
    let mut held = 0;
    while let Ok(outcome) = outcomes.try_recv() {
        match outcome {
            IterationOutcome::Accepted {
                reason: AcceptReason::Heartbeat,
                ..
            } => heartbeats += 1,
            IterationOutcome::Held { .. } => held += 1,
            IterationOutcome::Accepted { .. } => {}
        }
    }
    assert_eq!(heartbeats, 1);
    assert_eq!(held, 5);

    let session = rig.session.lock();
    let samples = session.samples();
    assert_eq!(samples.len(), 2);
    let gap = samples[1].timestamp() - samples[0].timestamp();
    assert_eq!(gap.num_milliseconds(), 5000);
}

#[tokio::test(start_paused = true)]
async fn test_peak_is_non_decreasing() {
    let rig = Rig::new(&[(0, 200), (0, 900), (0, 400), (0, 950), (0, 100)]);
    rig.connect().await;

    let peaks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&peaks);
    rig.session.lock().subscribe(move |key, value| {
        if *key == StateKey::PeakValue {
            sink.lock().push(value.as_number().unwrap_or_default());
        }
    });

    let mut acq = rig.acquisition(accept_all());
    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(4500)).await;
    acq.stop().await.unwrap();

    let peaks = peaks.lock().clone();
    assert_eq!(peaks, vec![2.0, 9.0, 9.5]);
    assert!(peaks.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(rig.session.lock().samples().len(), 5);
}

#[tokio::test]
async fn test_start_fails_when_disconnected() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connector.fail_connect(ConnectionFailure::PortNotFound);

    let err = rig
        .device
        .lock()
        .await
        .connect("/dev/ttyUSB9", &SerialSettings::default())
        .await
        .unwrap_err();
    assert!(err.is_connection());

    // even with a permissive validator, disconnected wins
    let mut acq = rig.acquisition(accept_all());
    let err = acq.start().unwrap_err();
    assert_eq!(err.precondition_kind(), Some(Precondition::NotConnected));
    assert!(!rig.session.lock().is_polling());
    assert_eq!(acq.phase(), LoopPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_required_metadata_gates_start() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connect().await;
    let mut acq = rig.acquisition(Arc::new(RequiredFields));

    let err = acq.start().unwrap_err();
    assert_eq!(err.precondition_kind(), Some(Precondition::MetadataIncomplete));

    let metadata: TestMetadata =
        toml::from_str(include_str!("../demos/test_metadata.toml")).unwrap();
    rig.session.lock().set_test_metadata(metadata);

    acq.start().unwrap();
    assert!(rig.session.lock().is_polling());
    acq.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transport_fault_stops_polling() {
    let rig = Rig::new(&[(0, 500), (0, 600)]);
    rig.connector.push_failure("no response from unit 0");
    rig.connect().await;

    let polling = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&polling);
    rig.session.lock().subscribe(move |key, value| {
        if *key == StateKey::IsPolling {
            sink.lock().push(value.as_flag().unwrap_or_default());
        }
    });

    let mut acq = rig.acquisition(accept_all());
    acq.start().unwrap();
    let err = acq.wait().await.unwrap_err();

    assert!(err.is_transport());
    assert!(!err.is_connection());
    assert_eq!(acq.phase(), LoopPhase::Faulted);
    assert_eq!(*polling.lock(), vec![true, false]);

    let session = rig.session.lock();
    assert!(!session.is_polling());
    assert!(session.is_connected());
    assert_eq!(session.samples().len(), 2);
    assert_eq!(session.peak_value(), 6.0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_data_only_when_idle() {
    let rig = Rig::new(&[(0, 500), (0, 800)]);
    rig.connect().await;
    let mut acq = rig.acquisition(accept_all());

    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let err = rig.session.lock().clear_data().unwrap_err();
    assert_eq!(err.precondition_kind(), Some(Precondition::AlreadyPolling));
    assert_eq!(rig.session.lock().samples().len(), 2);

    acq.stop().await.unwrap();
    rig.session.lock().clear_data().unwrap();

    let session = rig.session.lock();
    assert!(session.samples().is_empty());
    assert_eq!(session.peak_value(), 0.0);
    assert!(session.last_accepted_sample().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_and_closes() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connect().await;
    let mut acq = rig.acquisition(accept_all());

    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    acq.shutdown().await.unwrap();
    acq.shutdown().await.unwrap();

    assert_eq!(rig.connector.close_count(), 1);
    assert!(!rig.device.lock().await.is_open());
    let session = rig.session.lock();
    assert!(!session.is_polling());
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_close_rejected_while_running() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connect().await;
    let mut acq = rig.acquisition(accept_all());

    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = rig.device.lock().await.close().await.unwrap_err();
    assert_eq!(err.precondition_kind(), Some(Precondition::AlreadyPolling));
    assert!(rig.device.lock().await.is_open());
    assert_eq!(rig.connector.close_count(), 0);
    {
        let session = rig.session.lock();
        assert!(session.is_polling());
        assert!(session.is_connected());
    }

    // the loop keeps running on the open link
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(acq.phase(), LoopPhase::Running);
    assert_eq!(rig.connector.read_count(), 2);

    acq.shutdown().await.unwrap();
    assert_eq!(rig.connector.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_survives_restart() {
    let rig = Rig::new(&[(0, 500)]);
    rig.connect().await;
    let mut acq = rig.acquisition(accept_all());

    // accepts at 0 and 5000 ms
    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(6500)).await;
    acq.stop().await.unwrap();
    assert_eq!(rig.session.lock().samples().len(), 2);

    tokio::time::sleep(Duration::from_millis(2000)).await;

    // reads at 8500 and 9500 ms are held, 10500 ms is the next heartbeat
    acq.start().unwrap();
    tokio::time::sleep(Duration::from_millis(3000)).await;
    acq.stop().await.unwrap();

    let session = rig.session.lock();
    let samples = session.samples();
    assert_eq!(samples.len(), 3);
    let gap = samples[2].timestamp() - samples[1].timestamp();
    assert_eq!(gap.num_milliseconds(), 5500);
    assert!(samples
        .windows(2)
        .all(|w| w[1].timestamp() > w[0].timestamp()));
}
