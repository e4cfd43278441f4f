use std::rc::Rc;
use std::cell::{Ref, RefMut, RefCell};
use std::ops::Range;

use rand::Rng;
use itertools::Itertools;

use crate::{
  internal::*,
  scope,
  shape::Shape,
  scalar::{ Inner, Numeric, Signed, Real },
  variable::Variable,
};

mod cops;

pub(crate) use cops::Cops;


/// Flat storage behind a [Tensor]. Allocation and release are reported
/// to the [scope](crate::scope) accounting so leaks are observable.

#[derive(Debug)]
pub(crate) struct Buffer<T> {
  data: Vec<T>,
}

impl<T> Buffer<T> {
  fn new(data: Vec<T>) -> Self {
    scope::buffer_created();
    Self { data }
  }
}

impl<T> Drop for Buffer<T> {
  fn drop(&mut self) {
    scope::buffer_dropped();
  }
}


/// Multidimensional array over any [Inner] type.
///
/// Clones and views (range, reshape, transpose) share one buffer;
/// [detach](Tensor::detach) materializes an independent copy.
/// [Real] tensors can be lifted into the autodiff graph by calling
/// [tracked](Tensor::tracked) or [trained](Tensor::trained).

#[derive(Debug, Clone)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: Rc<RefCell<Buffer<T>>>,
}

impl<T: Inner> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    if self.shape.dims != rhs.shape.dims { return false }
    self.values().zip(rhs.values()).all(|(a, b)| a == b )
  }
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    assert_eq!(shape.size(), data.len(),
      "{} doesn't match data length {}", shape, data.len());
    Self { shape, data: Rc::new(RefCell::new(Buffer::new(data))) }
  }

  pub fn new(dims: &[usize], data: Vec<T>) -> Self {
    Self::from_shape(Shape::new(dims), data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::new(&[vec.len()], vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::new(&[], vec![item])
  }

  pub fn fill(dims: &[usize], filler: T) -> Self {
    Self::new(dims, vec![filler; dims.iter().product()])
  }

  /// Build a tensor from its logical indices, visited in row-major order.

  pub fn init(dims: &[usize], mut cb: impl FnMut(&[usize]) -> T) -> Self {
    let size = dims.iter().product();
    let mut indices = vec![0; dims.len()];
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
      data.push(cb(&indices));
      for d in (0..dims.len()).rev() {
        indices[d] += 1;
        if indices[d] < dims[d] { break }
        indices[d] = 0;
      }
    }
    Self::new(dims, data)
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub(crate) fn raw(&self) -> Ref<'_, Vec<T>> {
    Ref::map(self.data.borrow(), |buffer| &buffer.data )
  }

  pub(crate) fn raw_mut(&self) -> RefMut<'_, Vec<T>> {
    RefMut::map(self.data.borrow_mut(), |buffer| &mut buffer.data )
  }

  pub(crate) fn shares_buffer(&self, rhs: &Self) -> bool {
    Rc::ptr_eq(&self.data, &rhs.data)
  }

  pub fn item(&self) -> T {
    assert!(self.size() == 1,
      "Can't extract item from non-scalar {}", self.shape);
    self.raw()[self.shape.offset]
  }

  /// Overwrite this tensor's elements in place with `other`'s.

  pub fn feed(&self, other: &Self) {
    assert!(self.shape.dims == other.shape.dims,
      "Could not feed {} tensor with {} tensor", self.shape, other.shape);
    // Avoid clashing borrow when tensors share storage
    let other = if self.shares_buffer(other) {
      other.detach()
    } else {
      other.clone()
    };
    let mut data = self.raw_mut();
    let other_data = other.raw();
    for (i, j) in self.shape.iter().zip(other.shape.iter()) {
      data[i] = other_data[j];
    }
  }

  /// Materialize an independent, contiguously stored copy.

  pub fn detach(&self) -> Self {
    self.map(|a| a )
  }

  pub fn contiguous(&self) -> Self {
    if self.shape.contiguous() {
      self.clone()
    } else {
      self.detach()
    }
  }

  pub fn view(&self, dims: &[usize]) -> Self {
    let shape = self.shape.view(dims);
    Self { shape, data: self.data.clone() }
  }

  pub fn reshape(&self, dims: &[usize]) -> Self {
    self.contiguous().view(dims)
  }

  pub fn range(&self, ranges: &[Range<isize>]) -> Self {
    let shape = self.shape.range(ranges);
    Self { shape, data: self.data.clone() }
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    let shape = self.shape.transpose(dim1, dim2);
    Self { shape, data: self.data.clone() }
  }

  pub fn values(&self) -> TensorIterator<'_, T> {
    TensorIterator::new(self)
  }

  pub fn map<O, F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.values().map(cb).collect();
    Tensor::new(&self.shape.dims, data)
  }

  /// Combine two tensors elementwise. Shapes must match exactly, or one
  /// operand must be a scalar. Graph-level operations validate shapes
  /// before reaching this kernel.

  pub fn zip<O, F>(&self, rhs: &Self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: Fn((T, T)) -> O,
  {
    if self.shape.dims == rhs.shape.dims {
      let data = self.values().zip(rhs.values()).map(cb).collect();
      Tensor::new(&self.shape.dims, data)
    } else if rhs.rank() == 0 {
      let b = rhs.item();
      self.map(|a| cb((a, b)) )
    } else if self.rank() == 0 {
      let a = self.item();
      rhs.map(|b| cb((a, b)) )
    } else {
      panic!("Cannot combine {} and {} elementwise", self.shape, rhs.shape)
    }
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn zeros(dims: &[usize]) -> Self {
    Self::fill(dims, T::zero())
  }

  pub fn ones(dims: &[usize]) -> Self {
    Self::fill(dims, T::one())
  }

  pub fn arrange(dims: &[usize], start: T, step: T) -> Self {
    Self::new(dims, (0..dims.iter().product())
      .map(|i| T::from(i).unwrap() * step + start )
      .collect())
  }

  pub fn add(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Self {
    self.zip(rhs, |(a, b)| a / b )
  }

  pub fn sum(&self) -> T {
    self.values().sum()
  }

  /// Flattened permutation that would sort the values ascending. Stable
  /// for equal values, so gradient routing through a sort is
  /// deterministic.

  pub fn argsort(&self) -> Vec<usize> {
    let vals: Vec<T> = self.values().collect();
    (0..vals.len())
      .sorted_by(|&a, &b| vals[a].partial_cmp(&vals[b]).unwrap_or(std::cmp::Ordering::Equal) )
      .collect()
  }

  /// Flatten and sort ascending into a fresh rank-1 tensor.

  pub fn sorted(&self) -> Self {
    let vals: Vec<T> = self.values().collect();
    let data: Vec<T> = self.argsort().into_iter().map(|i| vals[i] ).collect();
    Self::new(&[vals.len()], data)
  }

  /// Matrix product of two rank-2 tensors.

  pub fn mm(&self, rhs: &Self) -> Self {
    assert!(self.rank() == 2 && rhs.rank() == 2,
      "mm expects two matrices, got {} and {}", self.shape, rhs.shape);
    assert_eq!(self.shape[1], rhs.shape[0],
      "Cannot multiply {} by {}", self.shape, rhs.shape);
    let data = self.matmul(rhs);
    Self::new(&[self.shape[0], rhs.shape[1]], data)
  }

  pub fn mean(&self) -> T {
    self.sum() / T::from(self.size()).unwrap()
  }
}

impl<T: Signed> Tensor<T> {
  pub fn abs(&self) -> Self {
    self.map(|a| a.abs() )
  }

  pub fn signum(&self) -> Self {
    self.map(|a| a.signum() )
  }
}

impl<T: Real> Tensor<T> {
  pub fn rand<R: Rng>(dims: &[usize], rng: &mut R) -> Self {
    Self::init(dims, |_| rng.gen_range(T::zero(), T::one()) )
  }

  pub fn randn<R: Rng>(dims: &[usize], rng: &mut R) -> Self {
    let len: usize = dims.iter().product();
    let mut data = vec![T::zero(); len];
    let mut i = 0;
    while i < len {
      let (a, b) = randn_pair(rng);
      data[i] = a;
      if i + 1 < len { data[i + 1] = b }
      i += 2;
    }
    Self::new(dims, data)
  }

  pub fn linspace(dims: &[usize], start: T, end: T) -> Self {
    let size: usize = dims.iter().product();
    // A single element sits at the start of the interval
    if size < 2 { return Self::fill(dims, start) }
    Self::arrange(dims, start, (end - start) / T::from(size - 1).unwrap())
  }

  pub fn sqrt(&self) -> Self {
    self.map(|a| a.sqrt() )
  }

  pub fn relu(&self) -> Self {
    self.map(|a| a.max(T::zero()) )
  }

  pub fn sigmoid(&self) -> Self {
    self.map(|a| T::one() / (T::one() + (-a).exp()) )
  }

  /// Lift into the autodiff graph as a constant.

  pub fn tracked(&self) -> Variable<T> {
    Variable::from_tensor(self.clone(), false)
  }

  /// Lift into the autodiff graph as a trainable parameter.

  pub fn trained(&self) -> Variable<T> {
    Variable::from_tensor(self.clone(), true)
  }
}

impl<T: Signed> std::ops::Neg for &Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Self::Output {
    self * (-T::one())
  }
}

impl<T: Signed> std::ops::Neg for Tensor<T> {
  type Output = Tensor<T>;

  fn neg(self) -> Self::Output {
    -&self
  }
}

macro_rules! add_operator {
  ($trait:ident, $meth:ident) => {
    impl<T: Numeric> std::ops::$trait for &Tensor<T> { // &tensor * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        self.$meth(rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait for Tensor<T> { // tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Self) -> Tensor<T> {
        (&self).$meth(&rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait<Tensor<T>> for &Tensor<T> { // &tensor * other
      type Output = Tensor<T>;

      fn $meth(self, rhs: Tensor<T>) -> Tensor<T> {
        self.$meth(&rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait<&Tensor<T>> for Tensor<T> { // tensor * &other
      type Output = Tensor<T>;

      fn $meth(self, rhs: &Tensor<T>) -> Tensor<T> {
        (&self).$meth(rhs)
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for &Tensor<T> { // &tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        self.$meth(&Tensor::scalar(rhs))
      }
    }

    impl<T: Numeric> std::ops::$trait<T> for Tensor<T> { // tensor * T
      type Output = Tensor<T>;

      fn $meth(self, rhs: T) -> Tensor<T> {
        (&self).$meth(&Tensor::scalar(rhs))
      }
    }
  };
}

add_operator!(Add, add);
add_operator!(Sub, sub);
add_operator!(Mul, mul);
add_operator!(Div, div);

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape, &self.detach().raw(), f)?;
    Ok(())
  }
}

fn print_chunks<T: std::fmt::Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = (0..idx * 2).map(|_| " " ).collect::<String>();
  if shape.rank() == 0 {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == shape.rank() - 1 {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    let chunks = vec.chunks(vec.len() / shape.dims[idx]);
    writeln!(f, "{indent}[")?;
    for chunk in chunks {
      print_chunks(idx + 1, shape, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}


pub struct TensorIterator<'a, T: Inner> {
  data: Ref<'a, Vec<T>>,
  shape_iter: Box<dyn Iterator<Item = usize> + 'a>,
}

impl<'a, T: Inner> TensorIterator<'a, T> {
  fn new(tensor: &'a Tensor<T>) -> Self {
    Self {
      data: tensor.raw(),
      shape_iter: tensor.shape.iter(),
    }
  }
}

impl<T: Inner> Iterator for TensorIterator<'_, T> {
  type Item = T;

  fn next(&mut self) -> Option<Self::Item> {
    self.shape_iter.next().map(|i| self.data[i] )
  }
}
