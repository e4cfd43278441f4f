use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  variable::Variable,
  model::{ Architecture, Geometry },
  scalar::Real,
};


/// Mean squared deviation between prediction and target.

pub fn reconstruction<T: Real>(target: &Variable<T>, pred: &Variable<T>) -> Result<Variable<T>> {
  pred.sub(target)?.sqr()?.mean()
}


/// Mean absolute difference between horizontally and vertically
/// adjacent pixels. Computed on shifted zero-copy views of the
/// prediction; a dimension of size one contributes nothing along its
/// axis.

pub fn smoothness<T: Real>(pred: &Variable<T>, geometry: Geometry) -> Result<Variable<T>> {
  let h = geometry.height as isize;
  let w = geometry.width as isize;
  let mut total: Option<Variable<T>> = None;
  if w > 1 {
    let dx = pred.slice(&[0..h, 1..w])?
      .sub(&pred.slice(&[0..h, 0..w - 1])?)?
      .abs()?
      .mean()?;
    total = Some(dx);
  }
  if h > 1 {
    let dy = pred.slice(&[1..h, 0..w])?
      .sub(&pred.slice(&[0..h - 1, 0..w])?)?
      .abs()?
      .mean()?;
    total = Some(match total {
      Some(dx) => dx.add(&dy)?,
      None => dy,
    });
  }
  match total {
    Some(term) => Ok(term),
    None => Ok(Tensor::scalar(T::zero()).tracked()),
  }
}


/// Negated mean of the prediction weighted by a left-to-right ramp.
/// Minimizing it pushes brightness toward the right edge.

pub fn directional<T: Real>(pred: &Variable<T>, ramp: &Variable<T>) -> Result<Variable<T>> {
  pred.mul(ramp)?.mean()?.neg()
}


/// Ramp running linearly from `-1` at the left edge to `+1` at the
/// right edge, constant down each column.

pub fn ramp_mask<T: Real>(geometry: Geometry) -> Tensor<T> {
  let width = geometry.width;
  Tensor::init(&geometry.dims(), |idx| {
    if width < 2 { return T::zero() }
    let col = T::from(idx[1]).unwrap();
    let span = T::from(width - 1).unwrap();
    (col + col) / span - T::one()
  })
}


/// Squared-error distance between the sorted prediction and the sorted
/// target, nudging the value distributions together.

pub fn distribution_soft<T: Real>(target_sorted: &Variable<T>, pred: &Variable<T>) -> Result<Variable<T>> {
  pred.sort()?.sub(target_sorted)?.sqr()?.mean()
}


/// Absolute-error variant of [distribution_soft]; its constant-magnitude
/// gradient enforces the target distribution much harder.

pub fn distribution_strict<T: Real>(target_sorted: &Variable<T>, pred: &Variable<T>) -> Result<Variable<T>> {
  pred.sort()?.sub(target_sorted)?.abs()?.mean()
}


/// Relative strength of each sculpting term. A weight of zero disables
/// its term entirely; it is never evaluated.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermWeights {
  pub reconstruction: f64,
  pub smoothness: f64,
  pub directional: f64,
  pub distribution_soft: f64,
  pub distribution_strict: f64,
}

impl TermWeights {
  /// The tuned mix for an architecture. Reconstruction pressure falls
  /// as capacity grows, while the sculpting terms take over; the strict
  /// distribution term is scaled up aggressively for the widest model.

  pub fn for_architecture(architecture: Architecture) -> Self {
    match architecture {
      Architecture::Compression => Self {
        reconstruction: 1.0,
        smoothness: 0.35,
        directional: 0.45,
        distribution_soft: 0.8,
        distribution_strict: 0.0,
      },
      Architecture::Transformation => Self {
        reconstruction: 0.55,
        smoothness: 0.45,
        directional: 0.6,
        distribution_soft: 0.0,
        distribution_strict: 1.6,
      },
      Architecture::Expansion => Self {
        reconstruction: 0.25,
        smoothness: 0.55,
        directional: 0.75,
        distribution_soft: 0.5,
        distribution_strict: 2.4,
      },
    }
  }

  pub fn for_tag(tag: &str) -> Result<Self> {
    Ok(Self::for_architecture(Architecture::from_tag(tag)?))
  }
}


/// Weighted sum of sculpting terms against a fixed target image.
///
/// The target, its sorted value distribution and the directional ramp
/// are captured once at construction, so repeated evaluations allocate
/// only the term graphs themselves.

#[derive(Debug)]
pub struct CompositeLoss<T: Real> {
  geometry: Geometry,
  weights: TermWeights,
  target: Variable<T>,
  target_sorted: Variable<T>,
  ramp: Variable<T>,
}

impl<T: Real> CompositeLoss<T> {
  pub fn new(input: &Tensor<T>, architecture: Architecture, geometry: Geometry) -> Result<Self> {
    Self::with_weights(input, TermWeights::for_architecture(architecture), geometry)
  }

  pub fn with_weights(input: &Tensor<T>, weights: TermWeights, geometry: Geometry) -> Result<Self> {
    if input.shape().dims != geometry.dims() {
      return Err(Error::Shape {
        op: "loss.target",
        lhs: input.shape().clone(),
        rhs: Shape::new(&geometry.dims()),
      })
    }
    Ok(Self {
      geometry,
      weights,
      // The target shares the input's buffer; only the sorted copy and
      // the ramp allocate
      target: input.tracked(),
      target_sorted: input.sorted().tracked(),
      ramp: ramp_mask(geometry).tracked(),
    })
  }

  pub fn target(&self) -> &Variable<T> {
    &self.target
  }

  pub fn weights(&self) -> TermWeights {
    self.weights
  }

  /// Evaluate the active terms against a prediction and fold them into
  /// one scalar loss variable. Zero-weighted terms are never built.

  pub fn evaluate(&self, pred: &Variable<T>) -> Result<Variable<T>> {
    let weights = self.weights;
    let mut total: Option<Variable<T>> = None;
    if weights.reconstruction != 0.0 {
      total = Self::accumulate(total, reconstruction(&self.target, pred)?, weights.reconstruction)?;
    }
    if weights.smoothness != 0.0 {
      total = Self::accumulate(total, smoothness(pred, self.geometry)?, weights.smoothness)?;
    }
    if weights.directional != 0.0 {
      total = Self::accumulate(total, directional(pred, &self.ramp)?, weights.directional)?;
    }
    if weights.distribution_soft != 0.0 {
      total = Self::accumulate(total, distribution_soft(&self.target_sorted, pred)?, weights.distribution_soft)?;
    }
    if weights.distribution_strict != 0.0 {
      total = Self::accumulate(total, distribution_strict(&self.target_sorted, pred)?, weights.distribution_strict)?;
    }
    match total {
      Some(sum) => Ok(sum),
      None => Ok(Tensor::scalar(T::zero()).tracked()),
    }
  }

  fn accumulate(total: Option<Variable<T>>, term: Variable<T>, weight: f64) -> Result<Option<Variable<T>>> {
    let scaled = term.scale(T::from(weight).unwrap())?;
    Ok(Some(match total {
      Some(sum) => sum.add(&scaled)?,
      None => scaled,
    }))
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn pair(geometry: Geometry, seed: u64) -> (Tensor<f64>, Variable<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let input = Tensor::rand(&geometry.dims(), &mut rng);
    let pred = Tensor::rand(&geometry.dims(), &mut rng).tracked();
    (input, pred)
  }

  #[test]
  fn ramp_spans_unit_interval() {
    let ramp: Tensor<f64> = ramp_mask(Geometry::new(2, 5));
    let values: Vec<f64> = ramp.values().collect();
    assert_eq!(&values[0..5], &[-1.0, -0.5, 0.0, 0.5, 1.0]);
    assert_eq!(&values[0..5], &values[5..10]);
  }

  #[test]
  fn smoothness_vanishes_on_constant_image() {
    let pred = Tensor::fill(&[4, 4], 0.7).tracked();
    let term = smoothness(&pred, Geometry::new(4, 4)).unwrap();
    assert_eq!(term.tensor().item(), 0.0);
  }

  #[test]
  fn directional_prefers_bright_right_edge() {
    let geometry = Geometry::new(3, 5);
    let ramp = ramp_mask::<f64>(geometry).tracked();
    let rising = Tensor::init(&geometry.dims(), |idx| idx[1] as f64 / 4.0 ).tracked();
    let flat = Tensor::fill(&geometry.dims(), 0.5).tracked();
    let rising_term = directional(&rising, &ramp).unwrap().item();
    let flat_term = directional(&flat, &ramp).unwrap().item();
    assert_eq!(rising.tensor().mean(), flat.tensor().mean());
    assert!(rising_term < flat_term);
  }

  #[test]
  fn distribution_terms_ignore_pixel_order() {
    let input = Tensor::new(&[2, 2], vec![0.4, 0.1, 0.9, 0.2]);
    let shuffled = Tensor::new(&[2, 2], vec![0.9, 0.2, 0.1, 0.4]).tracked();
    let sorted = input.sorted().tracked();
    assert_eq!(distribution_soft(&sorted, &shuffled).unwrap().item(), 0.0);
    assert_eq!(distribution_strict(&sorted, &shuffled).unwrap().item(), 0.0);
  }

  #[test]
  fn composite_is_the_weighted_term_sum() {
    let geometry = Geometry::new(4, 4);
    let (input, pred) = pair(geometry, 3);
    let weights = TermWeights::for_architecture(Architecture::Expansion);
    let loss = CompositeLoss::with_weights(&input, weights, geometry).unwrap();

    let sorted = input.sorted().tracked();
    let ramp = ramp_mask(geometry).tracked();
    let manual =
      weights.reconstruction * reconstruction(loss.target(), &pred).unwrap().item()
      + weights.smoothness * smoothness(&pred, geometry).unwrap().item()
      + weights.directional * directional(&pred, &ramp).unwrap().item()
      + weights.distribution_soft * distribution_soft(&sorted, &pred).unwrap().item()
      + weights.distribution_strict * distribution_strict(&sorted, &pred).unwrap().item();

    let total = loss.evaluate(&pred).unwrap().item();
    assert!((total - manual).abs() < 1e-12);
  }

  #[test]
  fn zero_weight_disables_term() {
    let geometry = Geometry::new(4, 4);
    let (input, pred) = pair(geometry, 4);
    let mut weights = TermWeights::for_architecture(Architecture::Compression);
    assert_eq!(weights.distribution_strict, 0.0);
    weights.smoothness = 0.0;
    weights.directional = 0.0;
    weights.distribution_soft = 0.0;
    let loss = CompositeLoss::with_weights(&input, weights, geometry).unwrap();
    let expected = reconstruction(loss.target(), &pred).unwrap().item();
    assert!((loss.evaluate(&pred).unwrap().item() - expected).abs() < 1e-12);
  }

  #[test]
  fn target_shares_the_input_buffer() {
    let geometry = Geometry::new(2, 2);
    let input = Tensor::<f64>::rand(&geometry.dims(), &mut StdRng::seed_from_u64(5));
    let loss = CompositeLoss::new(&input, Architecture::Compression, geometry).unwrap();
    assert!(loss.target().tensor().shares_buffer(&input));
  }

  #[test]
  fn geometry_mismatch_is_rejected() {
    let input = Tensor::<f64>::zeros(&[2, 3]);
    match CompositeLoss::new(&input, Architecture::Compression, Geometry::new(3, 2)) {
      Err(Error::Shape { op, .. }) => assert_eq!(op, "loss.target"),
      _ => panic!("expected shape error"),
    }
  }

  #[test]
  fn composite_gradient_agreement() {
    // Restricted to the smooth terms; abs- and sort-based terms are
    // checked against handwritten gradients where their kinks cannot
    // disturb a finite-difference estimate.
    let geometry = Geometry::new(3, 3);
    let input = Tensor::<f64>::rand(&geometry.dims(), &mut StdRng::seed_from_u64(7));
    let weights = TermWeights {
      reconstruction: 1.0,
      smoothness: 0.0,
      directional: 0.45,
      distribution_soft: 0.0,
      distribution_strict: 0.0,
    };
    let loss = CompositeLoss::with_weights(&input, weights, geometry).unwrap();
    let deviation = Variable::check_gradients(&geometry.dims(), 8, |pred| {
      loss.evaluate(pred)
    }).unwrap();
    assert!(deviation < 1e-4);
  }
}
