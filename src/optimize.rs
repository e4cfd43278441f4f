use std::collections::{ HashMap, HashSet };

use crate::{
  error::{ Error, Result },
  tensor::Tensor,
  variable::Variable,
  scalar::Real,
};


/// Update rule applied per parameter. `update` returns the change to
/// add onto the weights; stateful strategies key their per-parameter
/// state by the variable's id.

pub trait Strategy<T: Real> {
  fn update(&mut self, id: usize, weights: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Tensor<T>;
}


/// Drives a [Strategy] over a fixed set of parameters.
///
/// The parameter ids are captured at construction. Every call to
/// [minimize](Optimizer::minimize) re-validates them before touching
/// any weights, so a stale optimizer paired with a rebuilt model fails
/// cleanly instead of corrupting half the parameters.

pub struct Optimizer<T: Real, S: Strategy<T>> {
  strategy: S,
  pub learning_rate: T,
  step: usize,
  bound: HashSet<usize>,
}

impl<T: Real, S: Strategy<T>> Optimizer<T, S> {
  pub fn new(learning_rate: T, strategy: S, params: &[Variable<T>]) -> Self {
    Self {
      strategy,
      learning_rate,
      step: 0,
      bound: params.iter().map(|param| param.id() ).collect(),
    }
  }

  /// Number of completed update steps.

  pub fn steps(&self) -> usize {
    self.step
  }

  /// Backpropagate the loss and apply one update to every parameter it
  /// reached. Gradients are cleared afterwards so the next step starts
  /// from zero.

  pub fn minimize(&mut self, loss: &Variable<T>, params: &[Variable<T>]) -> Result<()> {
    for param in params {
      if !self.bound.contains(&param.id()) {
        return Err(Error::StateMismatch { param: param.id() })
      }
    }
    if let Err(err) = loss.backward() {
      // A partial backward may already have dropped gradients onto some
      // parameters; they must not fold into the next successful step
      for param in params {
        param.clear_grad();
      }
      return Err(err)
    }
    self.step += 1;
    for param in params {
      if let Some(grad) = param.grad() {
        let change = self.strategy.update(param.id(), param.tensor(), &grad, self.learning_rate, self.step);
        param.feed(&(param.tensor() + &change));
        param.clear_grad();
      }
    }
    Ok(())
  }
}


/// Plain gradient descent.

#[derive(Debug, Default)]
pub struct SGD;

impl<T: Real> Strategy<T> for SGD {
  fn update(&mut self, _id: usize, _weights: &Tensor<T>, grad: &Tensor<T>, rate: T, _step: usize) -> Tensor<T> {
    grad * -rate
  }
}


/// Adam with bias-corrected first and second moment estimates.
///
/// Moment tensors are allocated lazily on the first step and mutated in
/// place afterwards, so steady-state training allocates no new
/// optimizer memory.

#[derive(Debug)]
pub struct Adam<T: Real> {
  pub beta1: T,
  pub beta2: T,
  m: HashMap<usize, Tensor<T>>,
  v: HashMap<usize, Tensor<T>>,
}

impl<T: Real> Default for Adam<T> {
  fn default() -> Self {
    Self {
      beta1: T::from(0.9).unwrap(),
      beta2: T::from(0.999).unwrap(),
      m: HashMap::new(),
      v: HashMap::new(),
    }
  }
}

impl<T: Real> Strategy<T> for Adam<T> {
  fn update(&mut self, id: usize, _weights: &Tensor<T>, grad: &Tensor<T>, rate: T, step: usize) -> Tensor<T> {
    let dims = &grad.shape().dims;

    let m = self.m.entry(id).or_insert_with(|| Tensor::zeros(dims) );
    m.feed(&(&*m * self.beta1 + grad * (T::one() - self.beta1)));
    let mt = &*m / (T::one() - self.beta1.powi(step as i32));

    let v = self.v.entry(id).or_insert_with(|| Tensor::zeros(dims) );
    v.feed(&(&*v * self.beta2 + grad * grad * (T::one() - self.beta2)));
    let vt = &*v / (T::one() - self.beta2.powi(step as i32));

    mt * -rate / (vt.sqrt() + T::from(1e-8).unwrap())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn converge<S: Strategy<f64>>(strategy: S, rate: f64, steps: usize) -> f64 {
    let x = Tensor::vec(&[8.0]).trained();
    let target = Tensor::vec(&[3.0]).tracked();
    let params = [x.clone()];
    let mut optimizer = Optimizer::new(rate, strategy, &params);
    for _ in 0..steps {
      let loss = x.sub(&target).unwrap().sqr().unwrap().sum().unwrap();
      optimizer.minimize(&loss, &params).unwrap();
    }
    assert_eq!(optimizer.steps(), steps);
    x.tensor().item()
  }

  #[test]
  fn sgd_converges_on_quadratic() {
    let x = converge(SGD, 0.1, 100);
    assert!((x - 3.0).abs() < 1e-6);
  }

  #[test]
  fn adam_converges_on_quadratic() {
    // Adam's normalized steps settle into an orbit around the optimum
    // at learning-rate scale, so the tolerance is a few multiples of it
    let x = converge(Adam::default(), 0.01, 2000);
    assert!((x - 3.0).abs() < 0.05);
  }

  #[test]
  fn foreign_parameters_are_rejected() {
    let x = Tensor::vec(&[1.0]).trained();
    let params = [x.clone()];
    let mut optimizer = Optimizer::new(0.1, SGD, &params);

    let stranger = Tensor::vec(&[1.0]).trained();
    let loss = stranger.sqr().unwrap().sum().unwrap();
    match optimizer.minimize(&loss, &[stranger.clone()]) {
      Err(Error::StateMismatch { param }) => assert_eq!(param, stranger.id()),
      other => panic!("expected state mismatch, got {:?}", other),
    }
    // Nothing was stepped or mutated
    assert_eq!(optimizer.steps(), 0);
    assert_eq!(stranger.tensor(), &Tensor::vec(&[1.0]));
  }

  #[test]
  fn unreached_parameters_keep_their_weights() {
    let x = Tensor::vec(&[2.0]).trained();
    let unused = Tensor::vec(&[5.0]).trained();
    let params = [x.clone(), unused.clone()];
    let mut optimizer = Optimizer::new(0.1, SGD, &params);
    let loss = x.sqr().unwrap().sum().unwrap();
    optimizer.minimize(&loss, &params).unwrap();
    assert_eq!(unused.tensor(), &Tensor::vec(&[5.0]));
    assert!(x.tensor().item() < 2.0);
  }

  #[test]
  fn failed_backward_leaves_no_stale_gradient() {
    let x = Tensor::vec(&[1.0_f64, 2.0]).trained();
    let params = [x.clone()];
    let mut optimizer = Optimizer::new(0.1, SGD, &params);

    // The scale branch back-propagates onto x before the argsort
    // branch aborts the backward pass
    let broken = x.argsort().unwrap().sum().unwrap()
      .add(&x.scale(2.0).unwrap().sum().unwrap()).unwrap();
    match optimizer.minimize(&broken, &params) {
      Err(Error::Ungradable { op }) => assert_eq!(op, "argsort"),
      other => panic!("expected ungradable error, got {:?}", other),
    }
    assert_eq!(x.grad(), None);
    assert_eq!(optimizer.steps(), 0);

    // The next clean step must see only its own gradient
    let loss = x.scale(2.0).unwrap().sum().unwrap();
    optimizer.minimize(&loss, &params).unwrap();
    for (value, expected) in x.tensor().values().zip([0.8, 1.8]) {
      assert!((value - expected).abs() < 1e-12);
    }
  }

  #[test]
  fn gradients_are_cleared_after_a_step() {
    let x = Tensor::vec(&[2.0]).trained();
    let params = [x.clone()];
    let mut optimizer = Optimizer::new(0.1, SGD, &params);
    let loss = x.sqr().unwrap().sum().unwrap();
    optimizer.minimize(&loss, &params).unwrap();
    assert_eq!(x.grad(), None);
  }

  #[test]
  fn adam_first_step_is_rate_sized() {
    // With bias correction the very first change has magnitude close
    // to the learning rate regardless of gradient scale.
    let x = Tensor::vec(&[100.0_f64]).trained();
    let params = [x.clone()];
    let mut optimizer = Optimizer::new(0.1, Adam::default(), &params);
    let loss = x.sqr().unwrap().sum().unwrap();
    optimizer.minimize(&loss, &params).unwrap();
    assert!((x.tensor().item() - 99.9).abs() < 1e-6);
  }
}
