//! Accumulation buffers and the built-in film component that owns one.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::comp::Component;
use crate::core::errors::{LumenError, Result};
use crate::serial::{self, InputArchive, OutputArchive};

/// Per-pixel RGB accumulation, merged across workers by summation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumBuffer {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` contributions, row-major
    pub data: Vec<f64>,
}

impl AccumBuffer {
    /// Zeroed buffer. A size that does not fit `usize` saturates, so the
    /// allocation fails instead of wrapping; use [`AccumBuffer::try_new`] for
    /// sizes from untrusted input.
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(3);
        Self {
            width,
            height,
            data: vec![0.0; len],
        }
    }

    pub fn try_new(width: u32, height: u32) -> Result<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| {
                LumenError::configuration(format!("film size {}x{} is too large", width, height))
            })?;
        Ok(Self {
            width,
            height,
            data: vec![0.0; len],
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Add a contribution to pixel `index`
    pub fn splat(&mut self, index: usize, rgb: [f64; 3]) {
        let base = index * 3;
        if let Some(px) = self.data.get_mut(base..base + 3) {
            px[0] += rgb[0];
            px[1] += rgb[1];
            px[2] += rgb[2];
        }
    }

    pub fn pixel(&self, index: usize) -> Option<[f64; 3]> {
        let px = self.data.get(index * 3..index * 3 + 3)?;
        Some([px[0], px[1], px[2]])
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Element-wise sum of `other` into `self`
    pub fn merge(&mut self, other: &AccumBuffer) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(LumenError::protocol(format!(
                "accumulation buffer size mismatch: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            *dst += *src;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serial::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serial::decode(bytes)
    }
}

/// Film holding one accumulation buffer, constructed from `{"w": .., "h": ..}`.
#[crate::component("film::accum")]
#[derive(Debug, Default)]
pub struct AccumFilm {
    buffer: AccumBuffer,
}

impl AccumFilm {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: AccumBuffer::new(width, height),
        }
    }

    pub fn buffer(&self) -> &AccumBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AccumBuffer {
        &mut self.buffer
    }
}

impl Component for AccumFilm {
    fn construct(&mut self, prop: &Value) -> Result<()> {
        let dim = |name: &str| -> Result<u32> {
            prop.get(name)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    LumenError::configuration_field(
                        format!("film requires an unsigned integer '{}'", name),
                        name,
                    )
                })
        };
        self.buffer = AccumBuffer::try_new(dim("w")?, dim("h")?)?;
        Ok(())
    }

    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.save(&self.buffer)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        self.buffer = ar.load()?;
        Ok(())
    }

    fn underlying_value(&self, query: &str) -> Value {
        match query {
            "size" | "" => json!({ "w": self.buffer.width, "h": self.buffer.height }),
            _ => Value::Null,
        }
    }

    fn accumulation(&self) -> Option<&AccumBuffer> {
        Some(&self.buffer)
    }

    fn accumulation_mut(&mut self) -> Option<&mut AccumBuffer> {
        Some(&mut self.buffer)
    }
}
