use ndarray::{ArrayD, Dimension};

/// returns the frequency bin in standard DFT ordering (DC is index 0)
pub fn frequency_bin(index: usize, n: usize) -> i64 {
    assert!(index < n, "index out of range");
    let half_n = (n as i64 + 1) / 2;
    let index = index as i64;
    index - ((index >= half_n) as i64 * n as i64)
}

fn circshift<T: Clone>(x: &ArrayD<T>, shift: &[isize]) -> ArrayD<T> {
    assert_eq!(x.ndim(), shift.len(), "the shift must have the same number of dimensions as x");
    let dims = x.shape();
    ArrayD::from_shape_fn(x.raw_dim(), |idx| {
        // reverse the shift to find the original source coordinate
        let src: Vec<usize> = idx.slice().iter().zip(dims).zip(shift)
            .map(|((&i, &n), &s)| (i as isize - s).rem_euclid(n as isize) as usize)
            .collect();
        x[src.as_slice()].clone()
    })
}

/// forward fft shift, moving the DC bin to the center of each axis
pub fn fftshift<T: Clone>(x: &ArrayD<T>) -> ArrayD<T> {
    let shift: Vec<isize> = x.shape().iter().map(|&d| (d / 2) as isize).collect();
    circshift(x, &shift)
}

/// inverse fft shift, undoing [fftshift] for odd and even lengths alike
pub fn ifftshift<T: Clone>(x: &ArrayD<T>) -> ArrayD<T> {
    let shift: Vec<isize> = x.shape().iter().map(|&d| ((d + 1) / 2) as isize).collect();
    circshift(x, &shift)
}
