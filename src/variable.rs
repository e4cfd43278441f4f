use std::collections::HashSet;
use std::rc::Rc;
use std::cell::RefCell;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::{
  error::Result,
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
};

mod rules;


pub(crate) fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}


/// Unary computational operation paired with its derivative rule.
///
/// `check` validates the input shape before `run` executes, so shape
/// mismatches surface as [Error::Shape](crate::Error::Shape) values
/// instead of kernel panics. `derive` maps the incoming gradient to the
/// input's gradient; operations without a meaningful derivative return
/// [Error::Ungradable](crate::Error::Ungradable) there.

pub trait UnaryOp<T: Real>: Debug {
  fn check(&self, _lhs: &Shape) -> Result<()> { Ok(()) }
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T>;
  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>>;
}


/// Binary computational operation paired with its derivative rule.

pub trait BinaryOp<T: Real>: Debug {
  fn check(&self, lhs: &Shape, rhs: &Shape) -> Result<()>;
  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T>;
  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)>;
}


#[derive(Debug)]
enum Record<T: Real> {
  Unary(Box<dyn UnaryOp<T>>),
  Binary(Box<dyn BinaryOp<T>>),
}


/// Node on the tape: a [Variable]'s data and gradient slot, plus the
/// operation and inputs that produced it.

#[derive(Debug)]
struct Node<T: Real> {
  id: usize,
  data: Tensor<T>,
  grad: RefCell<Option<Tensor<T>>>,
  record: Option<Record<T>>,
  previous: Vec<Rc<Node<T>>>,
  trainable: bool,
  needs_grad: bool,
}

impl<T: Real> Node<T> {
  fn accumulate(&self, change: &Tensor<T>) {
    let mut slot = self.grad.borrow_mut();
    match &*slot {
      Some(grad) => grad.feed(&(grad + change)),
      // Detach so the slot owns its buffer instead of aliasing the change
      None => *slot = Some(change.detach()),
    }
  }

  fn backprop(&self) -> Result<()> {
    let (record, grad) = match (&self.record, &*self.grad.borrow()) {
      (Some(record), Some(grad)) => (record, grad.clone()),
      _ => return Ok(()),
    };
    match record {
      Record::Unary(op) => {
        let prev = &self.previous[0];
        if prev.needs_grad {
          let change = op.derive(&prev.data, &grad)?;
          prev.accumulate(&change);
        }
      },
      Record::Binary(op) => {
        let lhs = &self.previous[0];
        let rhs = &self.previous[1];
        if lhs.needs_grad || rhs.needs_grad {
          let (change_l, change_r) = op.derive(&lhs.data, &rhs.data, &grad)?;
          if lhs.needs_grad { lhs.accumulate(&change_l) }
          if rhs.needs_grad { rhs.accumulate(&change_r) }
        }
      },
    }
    Ok(())
  }
}


/// A tensor lifted onto the tape. Every differentiable operation
/// records its inputs, output and derivative rule, so
/// [backward](Variable::backward) can propagate gradients from a scalar
/// loss to all trainable parameters that produced it.
///
/// Variables are created with [tracked](Tensor::tracked) (constant) or
/// [trained](Tensor::trained) (parameter) and dereference to their
/// underlying [Tensor] for non-differentiable access.

#[derive(Debug, Clone)]
pub struct Variable<T: Real> {
  node: Rc<Node<T>>,
}

impl<T: Real> std::ops::Deref for Variable<T> {
  type Target = Tensor<T>;

  fn deref(&self) -> &Self::Target {
    &self.node.data
  }
}

impl<T: Real> PartialEq for Variable<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.node.data == rhs.node.data
  }
}

impl<T: Real> Variable<T> {
  pub(crate) fn from_tensor(tensor: Tensor<T>, trainable: bool) -> Self {
    Self {
      node: Rc::new(Node {
        id: make_id(),
        data: tensor,
        grad: RefCell::new(None),
        record: None,
        previous: vec![],
        trainable,
        needs_grad: trainable,
      }),
    }
  }

  fn operation(record: Record<T>, data: Tensor<T>, previous: Vec<Rc<Node<T>>>) -> Self {
    let needs_grad = previous.iter().any(|prev| prev.needs_grad );
    Self {
      node: Rc::new(Node {
        id: make_id(),
        data,
        grad: RefCell::new(None),
        record: Some(record),
        previous,
        trainable: false,
        needs_grad,
      }),
    }
  }

  fn unary(&self, op: impl UnaryOp<T> + 'static) -> Result<Self> {
    op.check(self.shape())?;
    let data = op.run(&self.node.data);
    Ok(Self::operation(Record::Unary(Box::new(op)), data, vec![self.node.clone()]))
  }

  fn binary(&self, op: impl BinaryOp<T> + 'static, rhs: &Self) -> Result<Self> {
    op.check(self.shape(), rhs.shape())?;
    let data = op.run(&self.node.data, &rhs.node.data);
    Ok(Self::operation(Record::Binary(Box::new(op)), data, vec![self.node.clone(), rhs.node.clone()]))
  }

  /// Identity of this variable's node; parameter gradients are keyed by it.

  pub fn id(&self) -> usize {
    self.node.id
  }

  pub fn tensor(&self) -> &Tensor<T> {
    &self.node.data
  }

  pub fn is_trainable(&self) -> bool {
    self.node.trainable
  }

  pub fn grad(&self) -> Option<Tensor<T>> {
    self.node.grad.borrow().clone()
  }

  /// Drop this variable's gradient buffer. Called after an optimizer
  /// update so no gradient outlives the step that produced it.

  pub fn clear_grad(&self) {
    *self.node.grad.borrow_mut() = None;
  }

  // Elementwise graph operations. Shapes must match exactly; scalar
  // constants go through scale/shift instead.

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.binary(rules::Add, rhs)
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.binary(rules::Sub, rhs)
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.binary(rules::Mul, rhs)
  }

  /// Multiply every element by a constant factor.

  pub fn scale(&self, factor: T) -> Result<Self> {
    self.unary(rules::Scale { factor })
  }

  pub fn neg(&self) -> Result<Self> {
    self.scale(-T::one())
  }

  pub fn matmul(&self, rhs: &Self) -> Result<Self> {
    self.binary(rules::MatMul, rhs)
  }

  pub fn relu(&self) -> Result<Self> {
    self.unary(rules::Relu)
  }

  pub fn sigmoid(&self) -> Result<Self> {
    self.unary(rules::Sigmoid)
  }

  pub fn abs(&self) -> Result<Self> {
    self.unary(rules::Abs)
  }

  pub fn sqr(&self) -> Result<Self> {
    self.unary(rules::Sqr)
  }

  /// Sum all elements into a scalar.

  pub fn sum(&self) -> Result<Self> {
    self.unary(rules::Sum)
  }

  /// Mean of all elements; its gradient distributes `1/n` evenly.

  pub fn mean(&self) -> Result<Self> {
    self.unary(rules::Mean)
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    self.unary(rules::Reshape { dims: dims.to_vec() })
  }

  /// Zero-copy window into the underlying data; the gradient scatters
  /// back into the source positions.

  pub fn slice(&self, ranges: &[Range<isize>]) -> Result<Self> {
    self.unary(rules::Slice { ranges: ranges.to_vec() })
  }

  /// Flatten and sort ascending. The gradient of each output routes
  /// back to the input position it was sourced from.

  pub fn sort(&self) -> Result<Self> {
    self.unary(rules::Sort)
  }

  /// Sorting permutation as values. Has no derivative rule; reaching it
  /// from a trainable parameter fails during backward.

  pub fn argsort(&self) -> Result<Self> {
    self.unary(rules::Argsort)
  }

  /// Propagate gradients from this variable back across the tape.

  pub fn backward(&self) -> Result<()> {
    if !self.node.needs_grad { return Ok(()) }
    let order = self.history();
    *self.node.grad.borrow_mut() = Some(Tensor::ones(&self.shape().dims));
    for node in order.iter().rev() {
      node.backprop()?;
    }
    Ok(())
  }

  /// All trainable parameters on this variable's tape, in creation order.

  pub fn parameters(&self) -> Vec<Self> {
    self.history()
      .into_iter()
      .filter(|node| node.trainable )
      .map(|node| Self { node } )
      .collect()
  }

  fn history(&self) -> Vec<Rc<Node<T>>> {
    let mut history = vec![];
    Self::history_recurse(&self.node, &mut history, &mut HashSet::new());
    history
  }

  fn history_recurse(node: &Rc<Node<T>>, history: &mut Vec<Rc<Node<T>>>, visited: &mut HashSet<usize>) {
    if visited.contains(&node.id) { return }
    visited.insert(node.id);
    for prev in &node.previous {
      Self::history_recurse(prev, history, visited);
    }
    history.push(node.clone());
  }

  /// Compare a function's automatic gradient against a central-difference
  /// approximation on a seeded random input. Returns the mean absolute
  /// deviation between the two.

  pub fn check_gradients<F>(dims: &[usize], seed: u64, generator: F) -> Result<T>
  where
    F: Fn(&Self) -> Result<Self>,
  {
    let eps = T::from(1e-2).unwrap();
    let two = T::from(2.0).unwrap();
    let input = Tensor::randn(dims, &mut StdRng::seed_from_u64(seed));
    let var = input.trained();
    let output = generator(&var)?.sum()?;
    output.backward()?;
    let grad = var.grad().expect("generator did not reach its input").detach();
    let raw: Vec<T> = input.values().collect();
    let mut num_grad = vec![T::zero(); raw.len()];
    for i in 0..raw.len() {
      let mut bumped = raw.clone();
      bumped[i] = bumped[i] + eps;
      let next = generator(&Tensor::new(dims, bumped).tracked())?.sum()?.item();
      let mut dipped = raw.clone();
      dipped[i] = dipped[i] - eps;
      let prev = generator(&Tensor::new(dims, dipped).tracked())?.sum()?.item();
      num_grad[i] = (next - prev) / (two * eps);
    }
    let num_grad = Tensor::new(&grad.shape().dims, num_grad);
    Ok((grad - num_grad).abs().mean())
  }
}

impl<T: Real> std::fmt::Display for Variable<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let title = if self.node.trainable { "Trainable" } else {
      if self.node.record.is_some() { "Computed" } else { "Tracked" }
    };
    write!(f, "{title} {}", self.tensor())
  }
}
