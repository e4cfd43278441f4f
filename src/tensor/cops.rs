use crate::{
  tensor::Tensor,
  scalar::Numeric,
};


/// Low-level compute kernel behind [Tensor::mm].

pub(crate) trait Cops<T: Numeric> {
  fn matmul(&self, rhs: &Self) -> Vec<T>;
}

impl<T: Numeric> Cops<T> for Tensor<T> {
  fn matmul(&self, rhs: &Self) -> Vec<T> {
    // Strided views get materialized so the kernel can assume
    // row-major addressing.
    let lhs = self.contiguous();
    let rhs = rhs.contiguous();

    let rows_l = lhs.shape()[0];
    let cols_l = lhs.shape()[1];
    let cols_r = rhs.shape()[1];

    let data_l = lhs.raw();
    let data_r = rhs.raw();
    let offset_l = lhs.shape().offset;
    let offset_r = rhs.shape().offset;

    let mut data = vec![T::zero(); rows_l * cols_r];
    for i in 0..rows_l {
      for k in 0..cols_l {
        let l = data_l[offset_l + i * cols_l + k];
        for j in 0..cols_r {
          data[i * cols_r + j] += l * data_r[offset_r + k * cols_r + j];
        }
      }
    }

    data
  }
}
