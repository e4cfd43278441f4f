use serde::{ Serialize, Deserialize };
use rand::rngs::StdRng;

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  variable::Variable,
  scalar::Real,
};


/// Capacity profile of a sculpting model, selected by tag at runtime.
///
/// All variants map an image onto an image of the same size; they
/// differ in how wide their hidden representation is relative to the
/// pixel count `n`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
  /// Single hidden layer of `n / 2` units, forcing a bottleneck.
  Compression,
  /// Single hidden layer of `n` units, dimension preserving.
  Transformation,
  /// Two hidden layers of `2n` units each.
  Expansion,
}

impl Architecture {
  /// Resolve a user-supplied tag. Unknown tags are a configuration
  /// error, never silently mapped to a default.

  pub fn from_tag(tag: &str) -> Result<Self> {
    match tag {
      "compression" => Ok(Self::Compression),
      "transformation" => Ok(Self::Transformation),
      "expansion" => Ok(Self::Expansion),
      _ => Err(Error::Configuration { tag: tag.to_string() }),
    }
  }

  pub fn tag(&self) -> &'static str {
    match self {
      Self::Compression => "compression",
      Self::Transformation => "transformation",
      Self::Expansion => "expansion",
    }
  }

  fn hidden_widths(&self, n: usize) -> Vec<usize> {
    match self {
      Self::Compression => vec![n / 2],
      Self::Transformation => vec![n],
      Self::Expansion => vec![2 * n, 2 * n],
    }
  }
}


/// Height and width of the image plane a model operates on.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
  pub height: usize,
  pub width: usize,
}

impl Geometry {
  pub fn new(height: usize, width: usize) -> Self {
    Self { height, width }
  }

  pub fn size(&self) -> usize {
    self.height * self.width
  }

  pub fn dims(&self) -> [usize; 2] {
    [self.height, self.width]
  }
}


#[derive(Debug, Clone, Copy, PartialEq)]
enum Activation {
  Relu,
  Sigmoid,
}


/// Fully connected layer with trainable weights and bias.

#[derive(Debug)]
pub struct Dense<T: Real> {
  weights: Variable<T>,
  bias: Variable<T>,
  activation: Activation,
}

impl<T: Real> Dense<T> {
  fn new(input: usize, size: usize, activation: Activation, rng: &mut StdRng) -> Self {
    // He initialization ahead of relu, Xavier ahead of sigmoid
    let gain = match activation {
      Activation::Relu => T::from(2.0).unwrap(),
      Activation::Sigmoid => T::one(),
    };
    let deviation = (gain / T::from(input).unwrap()).sqrt();
    Self {
      weights: (Tensor::randn(&[input, size], rng) * deviation).trained(),
      bias: Tensor::zeros(&[1, size]).trained(),
      activation,
    }
  }

  pub fn size(&self) -> usize {
    self.weights.shape()[1]
  }

  pub fn input_size(&self) -> usize {
    self.weights.shape()[0]
  }

  fn forward(&self, x: &Variable<T>) -> Result<Variable<T>> {
    let z = x.matmul(&self.weights)?.add(&self.bias)?;
    match self.activation {
      Activation::Relu => z.relu(),
      Activation::Sigmoid => z.sigmoid(),
    }
  }
}


/// Multilayer perceptron mapping an image onto an image of the same
/// geometry. The final layer always squashes through a sigmoid so the
/// output stays inside the unit interval.

#[derive(Debug)]
pub struct Model<T: Real> {
  geometry: Geometry,
  architecture: Architecture,
  layers: Vec<Dense<T>>,
}

impl<T: Real> Model<T> {
  pub fn new(architecture: Architecture, geometry: Geometry, rng: &mut StdRng) -> Self {
    let n = geometry.size();
    let mut layers = vec![];
    let mut input = n;
    for width in architecture.hidden_widths(n) {
      layers.push(Dense::new(input, width, Activation::Relu, rng));
      input = width;
    }
    layers.push(Dense::new(input, n, Activation::Sigmoid, rng));
    Self { geometry, architecture, layers }
  }

  pub fn geometry(&self) -> Geometry {
    self.geometry
  }

  pub fn architecture(&self) -> Architecture {
    self.architecture
  }

  pub fn layers(&self) -> &[Dense<T>] {
    &self.layers
  }

  /// Run the image through the network, producing a differentiable
  /// output of the same geometry.

  pub fn forward(&self, input: &Tensor<T>) -> Result<Variable<T>> {
    if input.shape().dims != self.geometry.dims() {
      return Err(Error::Shape {
        op: "model.forward",
        lhs: input.shape().clone(),
        rhs: Shape::new(&self.geometry.dims()),
      })
    }
    let mut x = input.tracked().reshape(&[1, self.geometry.size()])?;
    for layer in &self.layers {
      x = layer.forward(&x)?;
    }
    x.reshape(&self.geometry.dims())
  }

  /// Trainable weights and biases of every layer, in forward order.

  pub fn parameters(&self) -> Vec<Variable<T>> {
    self.layers.iter()
      .flat_map(|layer| [layer.weights.clone(), layer.bias.clone()] )
      .collect()
  }
}
