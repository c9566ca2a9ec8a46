use multicurve_lstm::{CurveSet, MultiCurveWindowedLstmPredictor, WindowedEstimator};
use ndarray::{Array1, Array3};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Daily temperature and humidity for a handful of stations.
fn synthetic_weather(stations: usize, days: usize) -> CurveSet {
    let times = Array1::from_iter((0..days).map(|d| d as f64));
    let values = Array3::from_shape_fn((stations, days, 2), |(station, day, feature)| {
        let season = (day as f64 * 2.0 * std::f64::consts::PI / 30.0 + station as f64).sin();
        match feature {
            0 => 15.0 + 8.0 * season + station as f64,
            _ => 60.0 - 20.0 * season,
        }
    });
    CurveSet::new(times, values, vec!["temperature".into(), "humidity".into()])
        .expect("synthetic curves are well formed")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("Windowed multi-curve LSTM forecast");
    println!("==================================\n");

    let curves = synthetic_weather(4, 90);
    println!("Stations: {}, days: {}", curves.n_series(), curves.n_times());

    let mut predictor = MultiCurveWindowedLstmPredictor::new(false);
    let parameters = json!({
        "hidden_units": [16, 8],
        "training_epochs": 15,
        "input_dropout": 0.1,
        "recurrent_dropout": 0.1,
        "width_input": 28,
        "width_output": 7
    });
    predictor
        .set_parameters(parameters.as_object())
        .expect("parameters are valid");
    println!("Configured: {}\n", predictor);

    if let Err(err) = predictor.fit_source(&curves, false, None) {
        eprintln!("Training failed: {}", err);
        return;
    }

    if let Some(history) = predictor.history() {
        println!(
            "Trained {} epochs in {:.2?}, final loss {:.6}",
            history.epochs(),
            history.total_time,
            history.final_loss().unwrap_or(f64::NAN)
        );
    }

    match predictor.predict_source(&curves, false, None) {
        Ok(forecast) => {
            for station in 0..forecast.dim().0 {
                let temperatures: Vec<String> = forecast
                    .slice(ndarray::s![station, .., 0])
                    .iter()
                    .map(|t| format!("{:.1}", t))
                    .collect();
                println!("Station {} next week temperature: [{}]", station, temperatures.join(", "));
            }
        }
        Err(err) => eprintln!("Prediction failed: {}", err),
    }

    predictor.compact();
    println!("\nAfter compacting: {}", predictor);
}
