use std::{env, io};

use log::info;
use ndarray::{Array2, ArrayD, IxDyn};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Normal;

use smart_loss::{Evaluator, Head, SmartConfig, SmartLoss, evaluator::TwinLinear};

const DEFAULT_SEED: u64 = 0;
const BATCH: usize = 4;
const SEQ: usize = 12;
const HIDDEN: usize = 16;
const CLASSES: usize = 3;

fn main() -> io::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("loading config from {path}");
            SmartConfig::from_path(path)?
        }
        None => SmartConfig::default(),
    };
    info!("{config:?}");

    let seed = match env::var("SMART_SEED") {
        Ok(seed) => seed
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        Err(_) => DEFAULT_SEED,
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let init = Normal::new(0.0, (1.0 / HIDDEN as f32).sqrt())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut model = TwinLinear::random((HIDDEN, CLASSES), &init, &mut rng);

    let embedding =
        ArrayD::<f32>::random_using(IxDyn(&[BATCH, SEQ, HIDDEN]), StandardNormal, &mut rng);
    // trailing padding, one more position per sample
    let mask = Array2::from_shape_fn((BATCH, SEQ), |(i, j)| if i + j < SEQ { 1.0 } else { 0.0 })
        .into_dyn();

    let (primary, secondary) = model.forward(embedding.view(), mask.view())?;
    let mut smart = SmartLoss::new(model, &config)?;

    for (head, target) in [(Head::Primary, primary), (Head::Secondary, secondary)] {
        let outcome = smart.search(&mut rng, embedding.view(), target.view(), mask.view(), head)?;
        let grad_norm = outcome
            .embedding_grad()
            .map(|g| g.iter().map(|v| v * v).sum::<f32>().sqrt())
            .unwrap_or_default();

        info!(
            "{head:?}: loss={} evaluations={} skipped={} |d embedding|={grad_norm}",
            outcome.loss(),
            outcome.evaluations(),
            outcome.skipped_steps(),
        );
    }

    let grad_norm = smart
        .evaluator()
        .grad()
        .iter()
        .map(|g| g * g)
        .sum::<f32>()
        .sqrt();
    info!("accumulated parameter gradient norm: {grad_norm}");

    Ok(())
}
