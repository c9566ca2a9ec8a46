use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use multicurve_lstm::*;
use ndarray::Array3;
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a debug-level subscriber scoped to this thread.
fn capture_logs<F: FnOnce()>(f: F) -> String {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    logs.contents()
}

#[derive(Debug, Clone, Default)]
struct UnreleasableBackend {
    inner: NdarrayBackend,
}

impl Backend for UnreleasableBackend {
    type Model = WindowedLstmModel;

    fn name(&self) -> &'static str {
        "unreleasable"
    }

    fn build(&self, architecture: &Architecture) -> Result<WindowedLstmModel> {
        self.inner.build(architecture)
    }

    fn release_memory(&self) -> Result<()> {
        Err(ForecastError::MemoryRelease("device busy".into()))
    }
}

fn two_epoch_parameters() -> serde_json::Value {
    json!({
        "hidden_units": 3,
        "training_epochs": 2,
        "input_dropout": 0.1,
        "recurrent_dropout": 0.1,
        "width_input": 4,
        "width_output": 2
    })
}

fn ramp(samples: usize, timesteps: usize) -> Array3<f64> {
    Array3::from_shape_fn((samples, timesteps, 1), |(i, t, _)| (i + 2 * t) as f64)
}

fn position(logs: &str, marker: &str) -> usize {
    logs.find(marker)
        .unwrap_or_else(|| panic!("missing {:?} in logs:\n{}", marker, logs))
}

#[test]
fn test_fit_logs_epoch_markers_in_order() {
    let logs = capture_logs(|| {
        let mut predictor = MultiCurveWindowedLstmPredictor::new(false);
        predictor.set_parameters(two_epoch_parameters().as_object()).unwrap();
        predictor.fit_windows(&ramp(5, 4), &ramp(5, 2)).unwrap();
    });

    let started = position(&logs, "Training started");
    let first_start = position(&logs, "Started Epoch 1/2");
    let first_end = position(&logs, "Finished Epoch 1/2: loss = ");
    let second_start = position(&logs, "Started Epoch 2/2");
    let second_end = position(&logs, "Finished Epoch 2/2: loss = ");
    let finished = position(&logs, "Training finished. Took ");

    assert!(started < first_start);
    assert!(first_start < first_end);
    assert!(first_end < second_start);
    assert!(second_start < second_end);
    assert!(second_end < finished);
    assert!(logs.contains("time taken = "));
    assert!(!logs.contains("Epoch 0/2"));
    assert!(!logs.contains("Epoch 3/2"));
}

#[test]
fn test_none_parameter_map_logs_notice() {
    let logs = capture_logs(|| {
        let mut predictor = MultiCurveWindowedLstmPredictor::new(false);
        predictor.set_parameters(None).unwrap();
    });

    assert!(logs.contains("Passed a None parameter map"));
}

#[test]
fn test_compact_warns_when_backend_memory_is_not_released() {
    let logs = capture_logs(|| {
        let mut predictor = MultiCurveWindowedLstmPredictor::with_backend(UnreleasableBackend::default(), false);
        predictor.set_parameters(two_epoch_parameters().as_object()).unwrap();
        predictor.fit_windows(&ramp(3, 4), &ramp(3, 2)).unwrap();

        predictor.compact();
        predictor.compact();
        assert!(!predictor.is_fitted());
    });

    let warning = position(&logs, "Could not clear backend memory");
    assert!(logs[..warning].contains("WARN"));
    assert!(logs.contains("device busy"));
    assert_eq!(logs.matches("Could not clear backend memory").count(), 2);
    assert_eq!(logs.matches("Done compacting").count(), 2);
    assert!(position(&logs, "Started compacting") < warning);
}
