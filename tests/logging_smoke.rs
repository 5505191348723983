use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use elmerge::{
    load_prices, log_app_start, log_config_resolved, reconcile_consumption, sync_periods,
    ConsumptionConfig, LoggingConfig, MirrorDirTransport, Period, PipelineConfig, PriceFilter,
    SyncConfig,
};
use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

#[test]
fn skipped_inputs_are_logged_not_fatal() {
    let temp = tempdir().expect("temp dir should be created");
    let export = temp.path().join("export.csv");
    let unknown = temp.path().join("unknown.csv");
    fs::write(
        &export,
        "Start Time;Quantity;Resolution;Unit Type;Quality\n2022-11-01T00:00:00Z;1,0;PT1H;kWh;OK\n",
    )
    .expect("export should be written");
    fs::write(&unknown, "a;b\n1;2\n").expect("unknown file should be written");

    let logs = capture_logs(Level::INFO, || {
        let consumption = reconcile_consumption(&[export, unknown], &ConsumptionConfig::default());
        assert_eq!(consumption.store.len(), 1);

        let sync_cfg = SyncConfig {
            local_dir: temp.path().join("prices"),
            ..SyncConfig::default()
        };
        let transport = MirrorDirTransport::new(temp.path().join("remote"));
        let report = sync_periods(&consumption.periods, &sync_cfg, &transport)
            .expect("sync should complete");
        assert_eq!(report.counts().remote_unavailable, 1);

        let prices = load_prices(
            &consumption.periods,
            &sync_cfg.local_dir,
            &PriceFilter::default(),
        );
        assert!(prices.store.is_empty());
    });

    assert!(logs.contains("\"event\":\"consumption.file.accepted\""));
    assert!(logs.contains("\"event\":\"consumption.file.unrecognized\""));
    assert!(logs.contains("\"event\":\"consumption.reconcile.finish\""));
    assert!(logs.contains("\"event\":\"sync.period.remote_unavailable\""));
    assert!(logs.contains("\"event\":\"prices.file.missing\""));
}

#[test]
fn fetched_periods_emit_fetch_event() {
    let temp = tempdir().expect("temp dir should be created");
    let sync_cfg = SyncConfig {
        local_dir: temp.path().join("prices"),
        ..SyncConfig::default()
    };
    let period = Period::new(2023, 1).expect("valid period");
    let remote_root = temp.path().join("remote");
    let remote_file = remote_root.join(
        elmerge::remote_path_for(&sync_cfg.remote_dir, period).trim_start_matches('/'),
    );
    fs::create_dir_all(remote_file.parent().expect("remote file has a parent"))
        .expect("remote dir should be created");
    fs::write(&remote_file, "DateTime\tAreaCode\tResolutionCode\tCurrency\tPrice\n")
        .expect("remote file should be written");

    let periods: BTreeSet<Period> = [period].into_iter().collect();
    let logs = capture_logs(Level::INFO, || {
        sync_periods(&periods, &sync_cfg, &MirrorDirTransport::new(&remote_root))
            .expect("sync should complete");
    });

    assert!(logs.contains("\"event\":\"sync.start\""));
    assert!(logs.contains("\"event\":\"sync.period.fetched\""));
    assert!(logs.contains("\"event\":\"sync.finish\""));
}

#[test]
fn lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default());
        log_config_resolved(&PipelineConfig::default());
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"config.resolved\""));
    assert!(logs.contains("\"timezone\":\"Europe/Helsinki\""));
}
