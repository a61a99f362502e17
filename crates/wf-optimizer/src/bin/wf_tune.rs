use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wf_optimizer::{CancellationToken, Optimizer, OptimizerSettings};
use wf_types::{Argument, Image, Pipeline};
use wf_workflow::{BoxBlur, LabelComponents, Threshold, Workflow};

const SIZE: usize = 48;

/// Two bright squares on a dark background with a deterministic ripple.
fn synthetic_scene() -> (Image, Image) {
    let inside = |y: usize, x: usize| {
        let first = (8..20).contains(&y) && (8..20).contains(&x);
        let second = (26..40).contains(&y) && (24..42).contains(&x);
        first || second
    };
    let noisy = Image::from_fn(SIZE, SIZE, |y, x| {
        let ripple = 0.3 * ((y * 7 + x * 13) as f64).sin();
        if inside(y, x) { 1.0 + ripple } else { ripple }
    });
    let clean = Image::from_fn(SIZE, SIZE, |y, x| if inside(y, x) { 1.0 } else { 0.0 });
    (noisy, clean)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match std::env::var("WF_OPTIMIZER_SETTINGS") {
        Ok(path) => OptimizerSettings::from_path(&path)
            .with_context(|| format!("loading settings from {path}"))?,
        Err(_) => OptimizerSettings::default(),
    };

    let (noisy, clean) = synthetic_scene();
    let mut reference_flow = Workflow::new();
    reference_flow
        .set_data("clean", clean)
        .set("labeled", LabelComponents::shared(), vec![Argument::task("clean")]);
    let reference = reference_flow
        .get("labeled")?
        .into_image()
        .context("reference labels are not an image")?;

    let mut workflow = Workflow::new();
    workflow
        .set_data("input", noisy)
        .set("blurred", BoxBlur::shared(), vec![Argument::task("input"), Argument::literal(1.0)])
        .set("binary", Threshold::shared(), vec![Argument::task("blurred"), Argument::literal(0.9)])
        .set("labeled", LabelComponents::shared(), vec![Argument::task("binary")]);

    let mut optimizer = Optimizer::new(workflow, settings)?;
    info!(parameters = ?optimizer.registry().display_names()?, "discovered parameters");

    let result = optimizer.run("labeled", &reference, &CancellationToken::new())?;
    optimizer.apply(&result.best)?;
    info!(
        values = ?optimizer.registry().get_free_values()?,
        duration_ms = result.duration_ms(),
        "applied best parameters"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
