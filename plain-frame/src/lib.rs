//! Minimal owned image buffer implementing the [`machine_vision_formats`]
//! traits, with row and pixel accessors for code that walks image data
//! directly.

use machine_vision_formats::{
    ImageBuffer, ImageBufferMutRef, ImageBufferRef, ImageData, ImageMutData, ImageStride,
    OwnedImageStride, PixelFormat, Stride,
};

/// An owned image whose pixel format is tracked at the type level.
///
/// The backing store is a plain `Vec<u8>` with an arbitrary (but fixed) row
/// stride of at least `width * bytes_per_pixel` bytes.
#[derive(Clone)]
pub struct PlainFrame<F> {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// number of bytes in an image row
    pub stride: u32,
    /// raw image data
    image_data: Vec<u8>,
    /// format of the data
    fmt: std::marker::PhantomData<F>,
}

fn valid_row_bytes<F: PixelFormat>(width: u32) -> usize {
    let fmt = machine_vision_formats::pixel_format::pixfmt::<F>().unwrap();
    fmt.bits_per_pixel() as usize * width as usize / 8
}

impl<F> PlainFrame<F>
where
    F: PixelFormat,
{
    /// Move a `Vec<u8>` buffer as the backing store for an image.
    ///
    /// Returns None if the buffer is too small for the requested dimensions.
    pub fn new(width: u32, height: u32, stride: u32, image_data: Vec<u8>) -> Option<Self> {
        let min_row = valid_row_bytes::<F>(width);
        if (stride as usize) < min_row || width == 0 || height == 0 {
            return None;
        }
        let sz = stride as usize * (height as usize - 1) + min_row;
        if image_data.len() < sz {
            return None;
        }
        Some(Self {
            width,
            height,
            stride,
            image_data,
            fmt: std::marker::PhantomData,
        })
    }

    /// Allocate a packed (stride == row bytes) image filled with zeros.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    /// Allocate a packed image with every byte set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        let stride = valid_row_bytes::<F>(width);
        Self {
            width,
            height,
            stride: stride as u32,
            image_data: vec![value; stride * height as usize],
            fmt: std::marker::PhantomData,
        }
    }

    /// Number of bytes per pixel for format `F`.
    pub fn bytes_per_pixel(&self) -> usize {
        valid_row_bytes::<F>(1)
    }

    /// Iterate over the valid (within-width) bytes of each row.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let valid = valid_row_bytes::<F>(self.width);
        self.image_data
            .chunks(self.stride as usize)
            .take(self.height as usize)
            .map(move |row| &row[..valid])
    }

    /// Iterate mutably over the valid bytes of each row.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        let valid = valid_row_bytes::<F>(self.width);
        self.image_data
            .chunks_mut(self.stride as usize)
            .take(self.height as usize)
            .map(move |row| &mut row[..valid])
    }

    /// The bytes of one pixel.
    ///
    /// Panics if `row` or `col` is outside the image.
    pub fn pixel_slice(&self, row: u32, col: u32) -> &[u8] {
        assert!(row < self.height && col < self.width);
        let bpp = self.bytes_per_pixel();
        let start = row as usize * self.stride as usize + col as usize * bpp;
        &self.image_data[start..start + bpp]
    }

    /// Mutable bytes of one pixel.
    ///
    /// Panics if `row` or `col` is outside the image.
    pub fn pixel_slice_mut(&mut self, row: u32, col: u32) -> &mut [u8] {
        assert!(row < self.height && col < self.width);
        let bpp = self.bytes_per_pixel();
        let start = row as usize * self.stride as usize + col as usize * bpp;
        &mut self.image_data[start..start + bpp]
    }

    /// Copy any stride-aware image into a newly allocated `PlainFrame`.
    pub fn copy_from<FRAME: ImageStride<F>>(frame: &FRAME) -> PlainFrame<F> {
        Self {
            width: frame.width(),
            height: frame.height(),
            stride: frame.stride() as u32,
            image_data: frame.image_data().to_vec(),
            fmt: std::marker::PhantomData,
        }
    }

    /// Copy the pixels of `frame` into this image, row by row, without
    /// reallocating.
    ///
    /// Panics if the dimensions differ.
    pub fn assign<FRAME: ImageStride<F>>(&mut self, frame: &FRAME) {
        assert!(
            self.width == frame.width() && self.height == frame.height(),
            "dimensions differ"
        );
        let valid = valid_row_bytes::<F>(self.width);
        let src_stride = frame.stride();
        let src_data = frame.image_data();
        for (r, row) in self.rows_mut().enumerate() {
            row.copy_from_slice(&src_data[r * src_stride..][..valid]);
        }
    }
}

impl<F> std::fmt::Debug for PlainFrame<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PlainFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

impl<F> ImageData<F> for PlainFrame<F> {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, F> {
        ImageBufferRef::new(&self.image_data)
    }
    fn buffer(self) -> ImageBuffer<F> {
        ImageBuffer::new(self.image_data)
    }
}

impl<F> ImageMutData<F> for PlainFrame<F> {
    fn buffer_mut_ref(&mut self) -> ImageBufferMutRef<'_, F> {
        ImageBufferMutRef::new(&mut self.image_data)
    }
}

impl<F> Stride for PlainFrame<F> {
    fn stride(&self) -> usize {
        self.stride as usize
    }
}

impl<F> From<PlainFrame<F>> for Vec<u8> {
    fn from(orig: PlainFrame<F>) -> Vec<u8> {
        orig.image_data
    }
}

fn _test_plain_frame_is_send<F: Send>() {
    // Compile-time test to ensure PlainFrame implements Send trait.
    fn implements<T: Send>() {}
    implements::<PlainFrame<F>>();
}

fn _test_plain_frame_is_frame_trait<F>() {
    // Compile-time test to ensure PlainFrame implements OwnedImageStride trait.
    fn implements<T: OwnedImageStride<F>, F>() {}
    implements::<PlainFrame<F>, F>();
}
