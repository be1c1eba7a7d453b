use ndarray::{Array, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::Normal;

use smart_loss::{
    Evaluator, GradScope, Head, SmartConfig, SmartErr, SmartLoss,
    config::DivergenceConfig,
    divergence::{Divergence, KlDiv, Reduction, SymKlDiv},
    evaluator::TwinLinear,
    norm::{InfNorm, L2Norm, NormFn},
};

/// Sums the embedding over its hidden axis and hands the same state out on both heads.
#[derive(Default)]
struct SumHidden {
    hidden: usize,
    calls: usize,
    scopes: Vec<GradScope>,
    last_state: Option<ArrayD<f32>>,
    detached: Option<Head>,
}

impl SumHidden {
    fn detached(head: Head) -> Self {
        Self {
            detached: Some(head),
            ..Default::default()
        }
    }
}

impl Evaluator for SumHidden {
    fn forward(
        &mut self,
        embedding: ArrayViewD<f32>,
        _mask: ArrayViewD<f32>,
    ) -> smart_loss::Result<(ArrayD<f32>, ArrayD<f32>)> {
        self.calls += 1;
        let last = Axis(embedding.ndim() - 1);
        self.hidden = embedding.len_of(last);

        let state = embedding.sum_axis(last);
        self.last_state = Some(state.clone());
        Ok((state.clone(), state))
    }

    fn backward(
        &mut self,
        head: Head,
        d_state: ArrayViewD<f32>,
        scope: GradScope,
    ) -> smart_loss::Result<Option<ArrayD<f32>>> {
        self.scopes.push(scope);
        if self.detached == Some(head) {
            return Ok(None);
        }

        let ndim = d_state.ndim();
        let mut shape = d_state.shape().to_vec();
        shape.push(self.hidden);
        let d = d_state.insert_axis(Axis(ndim));

        Ok(d.broadcast(IxDyn(&shape)).map(|d| d.to_owned()))
    }
}

/// Ignores the embedding entirely, so no gradient ever reaches the noise.
struct Constant {
    state: ArrayD<f32>,
    calls: usize,
}

impl Evaluator for Constant {
    fn forward(
        &mut self,
        _embedding: ArrayViewD<f32>,
        _mask: ArrayViewD<f32>,
    ) -> smart_loss::Result<(ArrayD<f32>, ArrayD<f32>)> {
        self.calls += 1;
        Ok((self.state.clone(), self.state.clone()))
    }

    fn backward(
        &mut self,
        _head: Head,
        _d_state: ArrayViewD<f32>,
        _scope: GradScope,
    ) -> smart_loss::Result<Option<ArrayD<f32>>> {
        Ok(None)
    }
}

fn config(num_steps: usize) -> SmartConfig {
    SmartConfig {
        num_steps,
        step_size: 0.01,
        epsilon: 1e-6,
        noise_var: 1e-5,
        ..Default::default()
    }
}

fn random(rng: &mut StdRng, shape: &[usize]) -> ArrayD<f32> {
    Array::random_using(IxDyn(shape), StandardNormal, rng)
}

/// Reproduces the initial noise a search seeded with `seed` draws first.
fn initial_noise(seed: u64, shape: &[usize], noise_var: f32) -> ArrayD<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    ArrayD::<f32>::random_using(IxDyn(shape), StandardNormal, &mut rng) * noise_var
}

/// Scales every row of the last axis so its largest absolute value is one.
fn directions(x: &ArrayD<f32>) -> ArrayD<f32> {
    let mut out = x.clone();
    for mut row in out.lanes_mut(Axis(x.ndim() - 1)) {
        let max = row.fold(0.0_f32, |m, &v| m.max(v.abs()));
        row /= max;
    }
    out
}

#[test]
fn end_to_end_on_summed_embeddings() {
    let mut rng = StdRng::seed_from_u64(1);
    let embedding = random(&mut rng, &[2, 5, 8]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 5]));
    let target = embedding.sum_axis(Axis(2));

    let mut smart = SmartLoss::new(SumHidden::default(), &config(3)).unwrap();
    let outcome = smart
        .search(&mut rng, embedding.view(), target.view(), mask.view(), Head::Primary)
        .unwrap();

    assert_eq!(smart.evaluator().calls, 4);
    assert_eq!(outcome.evaluations(), 4);
    assert_eq!(outcome.skipped_steps(), 0);
    assert!(outcome.loss().is_finite());
    assert!(outcome.loss() >= 0.0);
    assert_eq!(outcome.noise().shape(), embedding.shape());

    let grad = outcome.embedding_grad().expect("gradient path back to the embedding");
    assert_eq!(grad.shape(), embedding.shape());
    assert!(grad.iter().all(|g| g.is_finite()));
}

#[test]
fn evaluator_runs_once_more_than_the_steps() {
    let mut rng = StdRng::seed_from_u64(2);
    let embedding = random(&mut rng, &[3, 4, 6]);
    let target = random(&mut rng, &[3, 4]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[3, 4]));

    for k in 0..5 {
        let mut smart = SmartLoss::new(SumHidden::default(), &config(k)).unwrap();
        let outcome = smart
            .search(&mut rng, embedding.view(), target.view(), mask.view(), Head::Primary)
            .unwrap();

        assert_eq!(smart.evaluator().calls, k + 1);
        assert_eq!(outcome.evaluations(), k + 1);

        let mut expected = vec![GradScope::Input; k];
        expected.push(GradScope::Full);
        assert_eq!(smart.evaluator().scopes, expected);
    }
}

#[test]
fn zero_steps_returns_the_final_loss_of_the_initial_noise() {
    let seed = 5;
    let mut rng = StdRng::seed_from_u64(99);
    let embedding = random(&mut rng, &[2, 3, 4]);
    let target = random(&mut rng, &[2, 3]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 3]));

    let cfg = SmartConfig {
        final_loss: Some(DivergenceConfig::Kl {
            reduction: Reduction::BatchMean,
        }),
        ..config(0)
    };
    let mut smart = SmartLoss::new(SumHidden::default(), &cfg).unwrap();
    let outcome = smart
        .search(
            &mut StdRng::seed_from_u64(seed),
            embedding.view(),
            target.view(),
            mask.view(),
            Head::Primary,
        )
        .unwrap();

    let noise = initial_noise(seed, &[2, 3, 4], cfg.noise_var);
    assert_eq!(outcome.noise(), &noise);

    let state = smart.evaluator().last_state.clone().unwrap();
    assert_eq!(state, (&embedding + &noise).sum_axis(Axis(2)));

    let expected = KlDiv::default().loss(state.view(), target.view()).unwrap();
    assert_eq!(outcome.loss(), expected);
    assert!(outcome.target_grad().is_none());
}

#[test]
fn one_step_ascends_the_gradient_then_projects() {
    let seed = 21;
    let shape = [2, 5, 8];
    let mut rng = StdRng::seed_from_u64(20);
    let embedding = random(&mut rng, &shape);
    let target = random(&mut rng, &[2, 5]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 5]));

    let cfg = config(1);
    let mut smart = SmartLoss::new(SumHidden::default(), &cfg).unwrap();
    let outcome = smart
        .search(
            &mut StdRng::seed_from_u64(seed),
            embedding.view(),
            target.view(),
            mask.view(),
            Head::Primary,
        )
        .unwrap();

    let noise = initial_noise(seed, &shape, cfg.noise_var);
    let state = (&embedding + &noise).sum_axis(Axis(2));
    let d_state = SymKlDiv::default()
        .input_grad(state.view(), target.view())
        .unwrap();
    let grad = d_state
        .insert_axis(Axis(2))
        .broadcast(IxDyn(&shape))
        .unwrap()
        .to_owned();

    let candidate = &noise + &(grad * cfg.step_size);
    let norm = InfNorm.norm(candidate.view());
    let expected = &candidate / &(norm + cfg.epsilon);

    assert_eq!(outcome.noise().shape(), expected.shape());
    Zip::from(outcome.noise()).and(&expected).for_each(|&got, &want| {
        assert!((got - want).abs() < 1e-5, "{got} != {want}");
    });

    for row in outcome.noise().lanes(Axis(2)) {
        let max = row.fold(0.0_f32, |m, &v| m.max(v.abs()));
        assert!(max <= 1.0, "{max}");
    }
}

#[test]
fn one_step_raises_the_divergence_of_the_initial_noise() {
    let shape = [3, 6, 4];

    for seed in 30..34 {
        let mut rng = StdRng::seed_from_u64(seed);
        let embedding = random(&mut rng, &shape);
        let target = random(&mut rng, &[3, 6]);
        let mask = ArrayD::<f32>::ones(IxDyn(&[3, 6]));

        let noise_seed = seed + 100;
        let cfg = config(1);
        let mut smart = SmartLoss::new(SumHidden::default(), &cfg)
            .unwrap()
            .with_step_loss(KlDiv::default());
        let outcome = smart
            .search(
                &mut StdRng::seed_from_u64(noise_seed),
                embedding.view(),
                target.view(),
                mask.view(),
                Head::Primary,
            )
            .unwrap();

        let noise = initial_noise(noise_seed, &shape, cfg.noise_var);
        let state = (&embedding + &noise).sum_axis(Axis(2));
        let initial = KlDiv::default().loss(state.view(), target.view()).unwrap();

        assert!(
            outcome.loss() > initial,
            "seed {seed}: {} <= {initial}",
            outcome.loss()
        );
    }
}

#[test]
fn missing_gradients_leave_the_noise_direction_unchanged() {
    let seed = 8;
    let shape = [2, 5, 8];
    let mut rng = StdRng::seed_from_u64(3);
    let embedding = random(&mut rng, &shape);
    let state = random(&mut rng, &[2, 5]);
    let target = random(&mut rng, &[2, 5]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 5]));

    let evaluator = Constant { state, calls: 0 };
    let mut smart = SmartLoss::new(evaluator, &config(3)).unwrap();
    let outcome = smart
        .search(
            &mut StdRng::seed_from_u64(seed),
            embedding.view(),
            target.view(),
            mask.view(),
            Head::Primary,
        )
        .unwrap();

    assert_eq!(smart.evaluator().calls, 4);
    assert_eq!(outcome.skipped_steps(), 3);
    assert!(outcome.embedding_grad().is_none());

    let initial = directions(&initial_noise(seed, &shape, 1e-5));
    let last = directions(outcome.noise());
    Zip::from(&initial).and(&last).for_each(|&a, &b| {
        assert!((a - b).abs() < 1e-4, "{a} != {b}");
    });
}

#[test]
fn zero_noise_projects_to_zero() {
    let mut rng = StdRng::seed_from_u64(4);
    let embedding = random(&mut rng, &[2, 5, 8]);
    let state = random(&mut rng, &[2, 5]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 5]));

    let cfg = SmartConfig {
        noise_var: 0.0,
        ..config(2)
    };
    let evaluator = Constant {
        state: state.clone(),
        calls: 0,
    };
    let mut smart = SmartLoss::new(evaluator, &cfg).unwrap();
    let outcome = smart
        .search(&mut rng, embedding.view(), state.view(), mask.view(), Head::Primary)
        .unwrap();

    assert!(outcome.noise().iter().all(|&v| v == 0.0));
}

#[test]
fn head_selects_which_output_is_perturbed() {
    let mut rng = StdRng::seed_from_u64(6);
    let embedding = random(&mut rng, &[2, 4, 3]);
    let target = random(&mut rng, &[2, 4]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 4]));

    let mut smart = SmartLoss::new(SumHidden::detached(Head::Secondary), &config(2)).unwrap();

    let mut search = |head: Head| {
        smart
            .search(&mut rng, embedding.view(), target.view(), mask.view(), head)
            .unwrap()
    };

    assert_eq!(search(Head::Primary).skipped_steps(), 0);
    assert_eq!(search(true.into()).skipped_steps(), 0);

    let secondary = search(Head::Secondary);
    assert_eq!(secondary.skipped_steps(), 2);
    assert!(secondary.embedding_grad().is_none());
    assert_eq!(search(false.into()).skipped_steps(), 2);
}

#[test]
fn final_loss_defaults_to_the_step_loss() {
    let mut rng = StdRng::seed_from_u64(7);
    let embedding = random(&mut rng, &[2, 3, 4]);
    let target = random(&mut rng, &[2, 3]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 3]));

    let mut smart = SmartLoss::new(SumHidden::default(), &config(1)).unwrap();
    let outcome = smart
        .search(&mut rng, embedding.view(), target.view(), mask.view(), Head::Primary)
        .unwrap();

    let state = smart.evaluator().last_state.clone().unwrap();
    let expected = SymKlDiv::default().loss(state.view(), target.view()).unwrap();

    assert_eq!(outcome.loss(), expected);
    assert!(outcome.target_grad().is_some());
}

#[test]
fn losses_are_non_negative_on_a_linear_model() {
    let mut rng = StdRng::seed_from_u64(10);
    let init = Normal::new(0.0_f32, 0.5).unwrap();
    let model = TwinLinear::random((8, 4), &init, &mut rng);
    let embedding = random(&mut rng, &[3, 6, 8]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[3, 6]));

    let mut smart = SmartLoss::new(model, &config(2))
        .unwrap()
        .with_final_loss(KlDiv::default())
        .with_norm(L2Norm);
    let (primary, secondary) = smart
        .evaluator_mut()
        .forward(embedding.view(), mask.view())
        .unwrap();

    for (head, target) in [(Head::Primary, primary), (Head::Secondary, secondary)] {
        let outcome = smart
            .search(&mut rng, embedding.view(), target.view(), mask.view(), head)
            .unwrap();

        assert!(outcome.loss() >= 0.0);
        assert!(outcome.embedding_grad().is_some());
    }
    assert!(smart.evaluator().grad().iter().any(|&g| g != 0.0));
}

#[test]
fn mismatched_target_is_an_error() {
    let mut rng = StdRng::seed_from_u64(12);
    let embedding = random(&mut rng, &[2, 3, 4]);
    let target = random(&mut rng, &[2, 4]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 3]));

    let mut smart = SmartLoss::new(SumHidden::default(), &config(1)).unwrap();
    let res = smart.search(&mut rng, embedding.view(), target.view(), mask.view(), Head::Primary);

    assert!(matches!(res, Err(SmartErr::ShapeMismatch { .. })));
}

fn flat_norm(_x: ArrayViewD<f32>) -> ArrayD<f32> {
    ArrayD::ones(IxDyn(&[7]))
}

#[test]
fn non_broadcastable_norm_is_an_error() {
    let mut rng = StdRng::seed_from_u64(13);
    let embedding = random(&mut rng, &[2, 3, 4]);
    let target = random(&mut rng, &[2, 3]);
    let mask = ArrayD::<f32>::ones(IxDyn(&[2, 3]));

    let mut smart = SmartLoss::new(SumHidden::default(), &config(1))
        .unwrap()
        .with_norm(flat_norm);
    let res = smart.search(&mut rng, embedding.view(), target.view(), mask.view(), Head::Primary);

    assert!(matches!(res, Err(SmartErr::ShapeMismatch { .. })));
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let cfg = SmartConfig {
        epsilon: 0.0,
        ..Default::default()
    };

    assert!(matches!(
        SmartLoss::new(SumHidden::default(), &cfg),
        Err(SmartErr::InvalidConfig(_))
    ));
}
