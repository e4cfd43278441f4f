use std::ops::Range;

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
};

use super::{ UnaryOp, BinaryOp };


fn elementwise(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<()> {
  if lhs.dims == rhs.dims {
    Ok(())
  } else {
    Err(Error::Shape { op, lhs: lhs.clone(), rhs: rhs.clone() })
  }
}


#[derive(Debug)]
pub(crate) struct Add;

impl<T: Real> BinaryOp<T> for Add {
  fn check(&self, lhs: &Shape, rhs: &Shape) -> Result<()> {
    elementwise("add", lhs, rhs)
  }

  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs + rhs
  }

  fn derive(&self, _lhs: &Tensor<T>, _rhs: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    Ok((grad.clone(), grad.clone()))
  }
}


#[derive(Debug)]
pub(crate) struct Sub;

impl<T: Real> BinaryOp<T> for Sub {
  fn check(&self, lhs: &Shape, rhs: &Shape) -> Result<()> {
    elementwise("sub", lhs, rhs)
  }

  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs - rhs
  }

  fn derive(&self, _lhs: &Tensor<T>, _rhs: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    Ok((grad.clone(), -grad))
  }
}


#[derive(Debug)]
pub(crate) struct Mul;

impl<T: Real> BinaryOp<T> for Mul {
  fn check(&self, lhs: &Shape, rhs: &Shape) -> Result<()> {
    elementwise("mul", lhs, rhs)
  }

  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs * rhs
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    Ok((grad * rhs, grad * lhs))
  }
}


#[derive(Debug)]
pub(crate) struct Scale<T: Real> {
  pub factor: T,
}

impl<T: Real> UnaryOp<T> for Scale<T> {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs * self.factor
  }

  fn derive(&self, _lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad * self.factor)
  }
}


#[derive(Debug)]
pub(crate) struct MatMul;

impl<T: Real> BinaryOp<T> for MatMul {
  fn check(&self, lhs: &Shape, rhs: &Shape) -> Result<()> {
    if lhs.rank() == 2 && rhs.rank() == 2 && lhs[1] == rhs[0] {
      Ok(())
    } else {
      Err(Error::Shape { op: "matmul", lhs: lhs.clone(), rhs: rhs.clone() })
    }
  }

  fn run(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Tensor<T> {
    lhs.mm(rhs)
  }

  fn derive(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, grad: &Tensor<T>) -> Result<(Tensor<T>, Tensor<T>)> {
    Ok((
      grad.mm(&rhs.transpose(0, 1)),
      lhs.transpose(0, 1).mm(grad),
    ))
  }
}


#[derive(Debug)]
pub(crate) struct Relu;

impl<T: Real> UnaryOp<T> for Relu {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.relu()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad * lhs.map(|a| if a > T::zero() { T::one() } else { T::zero() } ))
  }
}


#[derive(Debug)]
pub(crate) struct Sigmoid;

impl<T: Real> UnaryOp<T> for Sigmoid {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.sigmoid()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let s = lhs.sigmoid();
    Ok(grad * &s * (Tensor::scalar(T::one()) - &s))
  }
}


#[derive(Debug)]
pub(crate) struct Abs;

impl<T: Real> UnaryOp<T> for Abs {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.abs()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad * lhs.signum())
  }
}


#[derive(Debug)]
pub(crate) struct Sqr;

impl<T: Real> UnaryOp<T> for Sqr {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs * lhs
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad * lhs * (T::one() + T::one()))
  }
}


#[derive(Debug)]
pub(crate) struct Sum;

impl<T: Real> UnaryOp<T> for Sum {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    Tensor::scalar(lhs.sum())
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(Tensor::fill(&lhs.shape().dims, grad.item()))
  }
}


#[derive(Debug)]
pub(crate) struct Mean;

impl<T: Real> UnaryOp<T> for Mean {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    Tensor::scalar(lhs.mean())
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    let n = T::from(lhs.size()).unwrap();
    Ok(Tensor::fill(&lhs.shape().dims, grad.item() / n))
  }
}


#[derive(Debug)]
pub(crate) struct Reshape {
  pub dims: Vec<usize>,
}

impl<T: Real> UnaryOp<T> for Reshape {
  fn check(&self, lhs: &Shape) -> Result<()> {
    if self.dims.iter().product::<usize>() == lhs.size() {
      Ok(())
    } else {
      Err(Error::Shape { op: "reshape", lhs: lhs.clone(), rhs: Shape::new(&self.dims) })
    }
  }

  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.reshape(&self.dims)
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    Ok(grad.reshape(&lhs.shape().dims))
  }
}


#[derive(Debug)]
pub(crate) struct Slice {
  pub ranges: Vec<Range<isize>>,
}

impl Slice {
  // Resolve negative bounds against the input, yielding the window's
  // dimension sizes or the offending extent on failure.
  fn window(&self, lhs: &Shape) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut dims = lhs.dims.clone();
    let mut valid = self.ranges.len() <= lhs.rank();
    for (d, range) in self.ranges.iter().enumerate().take(lhs.rank()) {
      let dim = lhs.dims[d] as isize;
      let start = if range.start < 0 { dim + range.start + 1 } else { range.start };
      let end = if range.end < 0 { dim + range.end + 1 } else { range.end };
      if start < 0 || end < start || end > dim { valid = false }
      dims[d] = (end - start).max(0) as usize;
    }
    if valid { Ok(dims) } else { Err(dims) }
  }
}

impl<T: Real> UnaryOp<T> for Slice {
  fn check(&self, lhs: &Shape) -> Result<()> {
    match self.window(lhs) {
      Ok(_) => Ok(()),
      Err(dims) => Err(Error::Shape { op: "slice", lhs: lhs.clone(), rhs: Shape::new(&dims) }),
    }
  }

  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.range(&self.ranges)
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    // Scatter into canonical strides; the input's own strides may
    // belong to a view of some larger buffer.
    let window = Shape::new(&lhs.shape().dims).range(&self.ranges);
    let out = Tensor::zeros(&lhs.shape().dims);
    {
      let mut raw = out.raw_mut();
      for (i, g) in window.iter().zip(grad.values()) {
        raw[i] = g;
      }
    }
    Ok(out)
  }
}


#[derive(Debug)]
pub(crate) struct Sort;

impl<T: Real> UnaryOp<T> for Sort {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    lhs.sorted()
  }

  fn derive(&self, lhs: &Tensor<T>, grad: &Tensor<T>) -> Result<Tensor<T>> {
    // perm[i] is the source position of sorted output i, so each
    // output gradient routes back to where its value came from.
    let perm = lhs.argsort();
    let mut data = vec![T::zero(); lhs.size()];
    for (g, &src) in grad.values().zip(perm.iter()) {
      data[src] = g;
    }
    Ok(Tensor::new(&lhs.shape().dims, data))
  }
}


#[derive(Debug)]
pub(crate) struct Argsort;

impl<T: Real> UnaryOp<T> for Argsort {
  fn run(&self, lhs: &Tensor<T>) -> Tensor<T> {
    let perm = lhs.argsort();
    Tensor::new(&[perm.len()], perm.into_iter().map(|i| T::from(i).unwrap() ).collect())
  }

  fn derive(&self, _lhs: &Tensor<T>, _grad: &Tensor<T>) -> Result<Tensor<T>> {
    Err(Error::Ungradable { op: "argsort" })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn slice_window_resolution() {
    let shape = Shape::new(&[3, 5]);
    let slice = Slice { ranges: vec![0..-1, 1..-1] };
    assert_eq!(slice.window(&shape), Ok(vec![3, 4]));

    let slice = Slice { ranges: vec![0..4] };
    assert!(slice.window(&shape).is_err());

    let slice = Slice { ranges: vec![0..2, 3..2] };
    assert!(slice.window(&shape).is_err());
  }

  #[test]
  fn sigmoid_derivative_peak() {
    let x = Tensor::vec(&[0.0_f64]);
    let grad = Tensor::vec(&[1.0]);
    let d = UnaryOp::derive(&Sigmoid, &x, &grad).unwrap();
    assert!((d.item() - 0.25).abs() < 1e-12);
  }

  #[test]
  fn matmul_gradient_shapes() {
    let lhs = Tensor::<f32>::ones(&[2, 3]);
    let rhs = Tensor::<f32>::ones(&[3, 4]);
    let grad = Tensor::<f32>::ones(&[2, 4]);
    let (gl, gr) = BinaryOp::derive(&MatMul, &lhs, &rhs, &grad).unwrap();
    assert_eq!(gl.shape().dims, vec![2, 3]);
    assert_eq!(gr.shape().dims, vec![3, 4]);
  }
}
