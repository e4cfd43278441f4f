use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
  scope::with_scope,
  model::{ Architecture, Geometry, Model },
  loss::{ reconstruction, CompositeLoss },
  optimize::{ Adam, Optimizer },
};


/// Receives the student's prediction after every completed step, for
/// display or capture. `()` discards the frames.

pub trait Presenter<T: Real> {
  fn present(&mut self, step: usize, frame: &Tensor<T>);
}

impl<T: Real> Presenter<T> for () {
  fn present(&mut self, _step: usize, _frame: &Tensor<T>) {}
}


/// Where the trainer currently is in its cooperative cycle.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
  Idle,
  Stepping,
  AutoRunning,
}


/// Losses observed during one completed training step.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport<T: Real> {
  pub step: usize,
  pub baseline_loss: T,
  pub student_loss: T,
}


/// Everything one training run owns: the target image, a baseline
/// model trained on reconstruction alone, a student model trained on
/// the composite loss, and an Adam optimizer bound to each.
///
/// All randomness flows from the stored seed, so two sessions built
/// with the same seed and tag evolve identically.

pub struct TrainingSession<T: Real> {
  geometry: Geometry,
  architecture: Architecture,
  learning_rate: T,
  seed: u64,
  step: usize,
  input: Tensor<T>,
  baseline: Model<T>,
  student: Model<T>,
  baseline_optimizer: Optimizer<T, Adam<T>>,
  student_optimizer: Optimizer<T, Adam<T>>,
  composite: CompositeLoss<T>,
}

impl<T: Real> TrainingSession<T> {
  /// Start a session on a given target image. The image must be rank
  /// two; its dimensions become the session's geometry.

  pub fn new(input: Tensor<T>, tag: &str, learning_rate: T, seed: u64) -> Result<Self> {
    let architecture = Architecture::from_tag(tag)?;
    let dims = &input.shape().dims;
    if dims.len() != 2 {
      return Err(Error::Shape {
        op: "session.input",
        lhs: input.shape().clone(),
        rhs: Shape::new(&[0, 0]),
      })
    }
    let geometry = Geometry::new(dims[0], dims[1]);
    Self::build(input, architecture, geometry, learning_rate, seed)
  }

  /// Start a session on a seeded random target image.

  pub fn seeded(geometry: Geometry, tag: &str, learning_rate: T, seed: u64) -> Result<Self> {
    let input = Tensor::rand(&geometry.dims(), &mut StdRng::seed_from_u64(seed));
    Self::new(input, tag, learning_rate, seed)
  }

  fn build(input: Tensor<T>, architecture: Architecture, geometry: Geometry, learning_rate: T, seed: u64) -> Result<Self> {
    let mut rng = StdRng::seed_from_u64(seed);
    let baseline = Model::new(architecture, geometry, &mut rng);
    let student = Model::new(architecture, geometry, &mut rng);
    let baseline_optimizer = Optimizer::new(learning_rate, Adam::default(), &baseline.parameters());
    let student_optimizer = Optimizer::new(learning_rate, Adam::default(), &student.parameters());
    let composite = CompositeLoss::new(&input, architecture, geometry)?;
    Ok(Self {
      geometry,
      architecture,
      learning_rate,
      seed,
      step: 0,
      input,
      baseline,
      student,
      baseline_optimizer,
      student_optimizer,
      composite,
    })
  }

  /// Tear the session down and rebuild it for another architecture,
  /// keeping the target image, learning rate and seed. The tag is
  /// validated before anything is discarded, so an unknown tag leaves
  /// the running session untouched.

  pub fn reset(&mut self, tag: &str) -> Result<()> {
    let architecture = Architecture::from_tag(tag)?;
    *self = Self::build(self.input.clone(), architecture, self.geometry, self.learning_rate, self.seed)?;
    Ok(())
  }

  pub fn step(&self) -> usize {
    self.step
  }

  pub fn architecture(&self) -> Architecture {
    self.architecture
  }

  pub fn geometry(&self) -> Geometry {
    self.geometry
  }

  pub fn input(&self) -> &Tensor<T> {
    &self.input
  }

  pub fn student(&self) -> &Model<T> {
    &self.student
  }

  pub fn baseline(&self) -> &Model<T> {
    &self.baseline
  }
}


/// Cooperative driver around a [TrainingSession]. Each call to
/// [step](Trainer::step) or [tick](Trainer::tick) performs exactly one
/// training step and returns, so a UI loop can interleave rendering
/// with training without threads.

pub struct Trainer<T: Real, P: Presenter<T>> {
  session: TrainingSession<T>,
  state: TrainerState,
  presenter: P,
}

impl<T: Real, P: Presenter<T>> Trainer<T, P> {
  pub fn new(session: TrainingSession<T>, presenter: P) -> Self {
    Self {
      session,
      state: TrainerState::Idle,
      presenter,
    }
  }

  pub fn state(&self) -> TrainerState {
    self.state
  }

  pub fn session(&self) -> &TrainingSession<T> {
    &self.session
  }

  /// Run one training step on both models. The baseline and the
  /// student are always both attempted; a failure in either leaves the
  /// trainer idle and surfaces the first error.

  pub fn step(&mut self) -> Result<StepReport<T>> {
    self.state = TrainerState::Stepping;
    let baseline = self.baseline_step();
    let student = self.student_step();
    let outcome = baseline.and_then(|baseline_loss| {
      student.map(|(student_loss, frame)| (baseline_loss, student_loss, frame) )
    });
    match outcome {
      Ok((baseline_loss, student_loss, frame)) => {
        self.session.step += 1;
        let step = self.session.step;
        self.presenter.present(step, &frame);
        log::debug!("step {step}: baseline {baseline_loss:?}, student {student_loss:?}");
        self.state = TrainerState::Idle;
        Ok(StepReport { step, baseline_loss, student_loss })
      },
      Err(err) => {
        log::warn!("training step failed: {err}");
        self.state = TrainerState::Idle;
        Err(err)
      },
    }
  }

  fn baseline_step(&mut self) -> Result<T> {
    let session = &mut self.session;
    with_scope(|| {
      let pred = session.baseline.forward(&session.input)?;
      let loss = reconstruction(session.composite.target(), &pred)?;
      session.baseline_optimizer.minimize(&loss, &session.baseline.parameters())?;
      Ok(loss.item())
    })
  }

  fn student_step(&mut self) -> Result<(T, Tensor<T>)> {
    let session = &mut self.session;
    with_scope(|| {
      let pred = session.student.forward(&session.input)?;
      let loss = session.composite.evaluate(&pred)?;
      let frame = pred.tensor().detach();
      session.student_optimizer.minimize(&loss, &session.student.parameters())?;
      Ok((loss.item(), frame))
    })
  }

  /// Arm the auto-run cycle; [tick](Trainer::tick) does the stepping.

  pub fn start_auto(&mut self) {
    self.state = TrainerState::AutoRunning;
  }

  /// Perform one step of an armed auto run. Does nothing unless the
  /// trainer is auto-running; a failed step disarms it.

  pub fn tick(&mut self) -> Option<Result<StepReport<T>>> {
    if self.state != TrainerState::AutoRunning { return None }
    let outcome = self.step();
    if outcome.is_ok() {
      self.state = TrainerState::AutoRunning;
    }
    Some(outcome)
  }

  pub fn stop(&mut self) {
    self.state = TrainerState::Idle;
  }

  /// Stop and rebuild the session for another architecture. An unknown
  /// tag is reported without disturbing the session.

  pub fn reset(&mut self, tag: &str) -> Result<()> {
    self.stop();
    self.session.reset(tag)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::scope::live_buffers;

  fn trainer(tag: &str) -> Trainer<f64, ()> {
    let session = TrainingSession::seeded(Geometry::new(8, 8), tag, 0.01, 42).unwrap();
    Trainer::new(session, ())
  }

  #[test]
  fn student_loss_decreases_for_every_architecture() {
    for tag in ["compression", "transformation", "expansion"] {
      let mut trainer = trainer(tag);
      let first = trainer.step().unwrap();
      let mut last = first;
      for _ in 0..49 {
        last = trainer.step().unwrap();
      }
      assert_eq!(last.step, 50);
      assert!(last.student_loss < first.student_loss, "{tag} did not improve");
      assert!(last.baseline_loss < first.baseline_loss, "{tag} baseline did not improve");
    }
  }

  #[test]
  fn steps_allocate_nothing_persistent() {
    let before = live_buffers();
    let mut trainer = trainer("compression");
    trainer.step().unwrap();
    // 8 parameter buffers across both models, two Adam moments each,
    // plus the input, sorted target and ramp
    assert_eq!(live_buffers(), before + 8 + 16 + 3);
    let after_first = live_buffers();
    for _ in 0..5 {
      trainer.step().unwrap();
    }
    assert_eq!(live_buffers(), after_first);
  }

  #[test]
  fn identically_seeded_sessions_train_identically() {
    let mut a = trainer("transformation");
    let mut b = trainer("transformation");
    for _ in 0..3 {
      let ra = a.step().unwrap();
      let rb = b.step().unwrap();
      assert_eq!(ra, rb);
    }
    for (pa, pb) in a.session().student().parameters().iter()
      .zip(b.session().student().parameters().iter())
    {
      assert_eq!(pa.tensor(), pb.tensor());
    }
  }

  #[test]
  fn tick_only_acts_while_auto_running() {
    let mut trainer = trainer("compression");
    assert!(trainer.tick().is_none());
    trainer.start_auto();
    assert!(trainer.tick().unwrap().is_ok());
    assert_eq!(trainer.state(), TrainerState::AutoRunning);
    trainer.stop();
    assert!(trainer.tick().is_none());
    assert_eq!(trainer.session().step(), 1);
  }

  #[test]
  fn failed_step_disarms_the_auto_run() {
    let mut trainer = trainer("compression");
    trainer.start_auto();
    // Rebuild the student model behind the optimizer's back; its
    // parameters are no longer the ones the optimizer was bound to
    trainer.session.student = Model::new(
      Architecture::Compression,
      trainer.session.geometry,
      &mut StdRng::seed_from_u64(1),
    );
    match trainer.tick() {
      Some(Err(Error::StateMismatch { .. })) => {},
      other => panic!("expected state mismatch, got {:?}", other),
    }
    assert_eq!(trainer.state(), TrainerState::Idle);
    assert!(trainer.tick().is_none());
  }

  #[test]
  fn reset_validates_before_discarding() {
    let mut trainer = trainer("compression");
    trainer.step().unwrap();
    match trainer.reset("inflation") {
      Err(Error::Configuration { tag }) => assert_eq!(tag, "inflation"),
      other => panic!("expected configuration error, got {:?}", other),
    }
    assert_eq!(trainer.session().architecture(), Architecture::Compression);
    assert_eq!(trainer.session().step(), 1);
  }

  #[test]
  fn reset_switches_architecture_and_restarts() {
    let mut trainer = trainer("compression");
    trainer.step().unwrap();
    trainer.reset("expansion").unwrap();
    assert_eq!(trainer.session().architecture(), Architecture::Expansion);
    assert_eq!(trainer.session().step(), 0);
    assert_eq!(trainer.state(), TrainerState::Idle);
    let layers = trainer.session().student().layers();
    assert_eq!(layers[0].input_size(), 64);
    assert_eq!(layers[0].size(), 128);
    trainer.step().unwrap();
  }

  #[test]
  fn reset_reproduces_the_initial_run() {
    let mut trainer = trainer("compression");
    let first = trainer.step().unwrap();
    for _ in 0..3 {
      trainer.step().unwrap();
    }
    trainer.reset("compression").unwrap();
    assert_eq!(trainer.step().unwrap(), StepReport { step: 1, ..first });
  }

  #[test]
  fn presenter_sees_every_frame() {
    struct Recorder {
      steps: Vec<usize>,
    }

    impl Presenter<f64> for Recorder {
      fn present(&mut self, step: usize, frame: &Tensor<f64>) {
        assert_eq!(frame.shape().dims, vec![8, 8]);
        self.steps.push(step);
      }
    }

    let session = TrainingSession::seeded(Geometry::new(8, 8), "compression", 0.01, 7).unwrap();
    let mut trainer = Trainer::new(session, Recorder { steps: vec![] });
    for _ in 0..3 {
      trainer.step().unwrap();
    }
    assert_eq!(trainer.presenter.steps, vec![1, 2, 3]);
  }
}
