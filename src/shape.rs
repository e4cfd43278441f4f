use std::ops::Range;

use serde::{Serialize, Deserialize};

use crate::internal::*;


/// The shape of a [Tensor](crate::Tensor): dimension sizes plus the
/// strides and offset used to address a flat buffer.
///
/// Range slicing and transposition produce new shapes over the same
/// buffer, so adjacent-pixel views never copy pixel data.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
  pub(crate) strides: Vec<isize>,
  pub(crate) offset: usize,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    let strides = Self::make_strides(dims);
    Self {
      dims: dims.to_vec(),
      strides,
      offset: 0,
    }
  }

  fn make_strides(dims: &[usize]) -> Vec<isize> {
    if dims.is_empty() { return vec![] }
    let mut strides = vec![0; dims.len()];
    strides[dims.len() - 1] = 1;
    for i in (1..dims.len()).rev() {
      strides[i - 1] = dims[i] as isize * strides[i];
    }
    strides
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub(crate) fn index(&self, indices: &[usize]) -> usize {
    assert!(indices.len() <= self.rank());
    // Missing trailing dimensions address the first element
    (indices.iter()
      .chain(std::iter::repeat(&0))
      .zip(&self.strides)
      .map(|(&i, &s)| i as isize * s)
      .sum::<isize>() + self.offset as isize
    ) as usize
  }

  pub fn contiguous(&self) -> bool {
    self.strides == Self::make_strides(&self.dims)
  }

  pub fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
    if self.contiguous() {
      Box::new(self.offset..self.offset + self.size())
    } else {
      Box::new(ShapeIterator::new(self))
    }
  }

  /// Reinterpret the dimensions of contiguous data. A single zero entry
  /// acts as a placeholder sized to preserve the total element count.

  pub fn view(&self, dims: &[usize]) -> Self {
    assert!(self.contiguous(), "Cannot view non-contiguous {}", self);
    let dims: Vec<usize> = dims.iter().enumerate().map(|(i, &n)| if n == 0 {
      let product: usize =
        dims[0..i].iter()
        .chain(dims[i + 1..dims.len()].iter())
        .product();
      self.size() / product
    } else {
      n
    }).collect();
    let strides = Self::make_strides(&dims);
    Self { dims, strides, offset: self.offset }
  }

  /// Restrict dimensions to sub-ranges without copying. Negative bounds
  /// count from behind, so `0..-1` spans a whole dimension.

  pub fn range(&self, ranges: &[Range<isize>]) -> Self {
    let mut offset = 0;
    let mut dims = self.dims.clone();
    for (d, range) in ranges.iter().enumerate() {
      let dim = self.dims[d];
      let start = negative_index(range.start, dim, true);
      let end = negative_index(range.end, dim, true);
      offset += self.strides[d] * start as isize;
      dims[d] = end - start;
    }
    Self { dims, strides: self.strides.clone(), offset: (self.offset as isize + offset) as usize }
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    let dim1 = negative_index(dim1, self.rank(), false);
    let dim2 = negative_index(dim2, self.rank(), false);
    let mut shape = self.clone();
    shape.dims.swap(dim1, dim2);
    shape.strides.swap(dim1, dim2);
    shape
  }
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, i: isize) -> &usize {
    let idx = negative_index(i, self.rank(), false);
    &self.dims[idx]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}


/// Iterate through a [Shape]'s buffer indices in logical order.

pub struct ShapeIterator<'a> {
  shape: &'a Shape,
  counter: Vec<usize>,
  idx: isize,
  finished: bool,
}

impl<'a> ShapeIterator<'a> {
  fn new(shape: &'a Shape) -> Self {
    Self {
      counter: vec![0; shape.rank()],
      idx: shape.offset as isize,
      shape,
      finished: false,
    }
  }
}

impl<'a> Iterator for ShapeIterator<'a> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished { return None }
    let out = self.idx as usize;
    let len = self.counter.len();
    if len == 0 { self.finished = true; return Some(out) }
    // Walk backward through dimensions
    for cd in (0..len).rev() {
      // Increment counter on full turn of right hand dimension
      if cd == len - 1 || self.counter[cd + 1] == 0 {
        let count = &mut self.counter[cd];
        // Full turn?
        if *count == self.shape.dims[cd] - 1 {
          if cd == 0 { self.finished = true; break }
          *count = 0;
          let backstride = (self.shape.dims[cd] as isize - 1) * self.shape.strides[cd];
          self.idx -= backstride;
        } else {
          *count += 1;
          self.idx += self.shape.strides[cd];
        }
      } else {
        break
      }
    }
    Some(out)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strides() {
    let shape = Shape::new(&[3,2,2]);
    assert_eq!(shape.strides, vec![4,2,1]);

    let shape = Shape::new(&[2,3,2]);
    assert_eq!(shape.strides, vec![6,2,1]);
  }

  #[test]
  fn index() {
    let shape = Shape::new(&[2,3]);
    assert_eq!(shape.index(&[0]), 0);
    assert_eq!(shape.index(&[1,0]), 3);
  }

  #[test]
  fn range() {
    let shape = Shape::new(&[4,4]).range(&[1..3, 1..3]);
    assert_eq!(shape.dims, vec![2,2]);
    assert_eq!(shape.offset, 5);
    let indices: Vec<_> = shape.iter().collect();
    assert_eq!(indices, vec![5, 6, 9, 10]);
  }

  #[test]
  fn range_negative_end() {
    let shape = Shape::new(&[3,5]).range(&[0..-1, 1..-1]);
    assert_eq!(shape.dims, vec![3,4]);
    assert_eq!(shape.offset, 1);
  }

  #[test]
  fn adjacent_columns() {
    // The two views used for neighbor differencing address the same
    // buffer shifted by one column.
    let shape = Shape::new(&[4,4]);
    let left = shape.range(&[0..4, 0..3]);
    let right = shape.range(&[0..4, 1..4]);
    assert_eq!(left.dims, right.dims);
    let l: Vec<_> = left.iter().collect();
    let r: Vec<_> = right.iter().collect();
    assert_eq!(l[0] + 1, r[0]);
    assert_eq!(l.len(), 12);
  }

  #[test]
  fn view() {
    let shape = Shape::new(&[4,4]).view(&[2,8]);
    assert_eq!(shape.dims, vec![2,8]);
    assert_eq!(shape.strides, vec![8,1]);

    let shape = Shape::new(&[4,4]).view(&[1,0]);
    assert_eq!(shape.dims, vec![1,16]);
  }

  #[test]
  fn transpose() {
    let shape = Shape::new(&[2,3]).transpose(0,1);
    assert_eq!(shape.dims, vec![3,2]);
    assert_eq!(shape.strides, vec![1,3]);
    assert_eq!(shape.index(&[1,0]), 1);
    assert_eq!(shape.index(&[1,1]), 4);
  }

  #[test]
  fn scalar_iterates_once() {
    let shape = Shape::new(&[]);
    let indices: Vec<_> = shape.iter().collect();
    assert_eq!(indices, vec![0]);
  }
}
