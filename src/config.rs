use crate::error::{Result, SplatError};

/// Width of the depth sort key in bits.
pub const KEY_BITS: u32 = 32;

/// Radix sort sizing. `rows_per_thread` is the number of keys one thread
/// handles in the histogram and scatter kernels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SortConfig {
    pub bits_per_pass: u32,
    pub workgroup_size: u32,
    pub rows_per_thread: u32,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            bits_per_pass: 4,
            workgroup_size: 256,
            rows_per_thread: 4,
        }
    }
}

impl SortConfig {
    pub fn bin_count(&self) -> u32 {
        1 << self.bits_per_pass
    }

    pub fn digit_mask(&self) -> u32 {
        self.bin_count() - 1
    }

    /// Keys covered by one workgroup.
    pub fn block_size(&self) -> u32 {
        self.workgroup_size * self.rows_per_thread
    }

    pub fn pass_count(&self) -> u32 {
        KEY_BITS.div_ceil(self.bits_per_pass)
    }

    /// Pass `p` reads ping-pong side `p % 2` and writes the other one, so an odd
    /// pass count leaves the sorted data in the secondary buffer.
    pub fn result_in_secondary(&self) -> bool {
        self.pass_count() % 2 == 1
    }

    pub fn block_count(&self, keys: u32) -> u32 {
        keys.div_ceil(self.block_size())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.bits_per_pass) {
            return Err(SplatError::InvalidConfig(format!(
                "bits_per_pass must be in 1..=8, got {}",
                self.bits_per_pass
            )));
        }
        if self.rows_per_thread == 0 {
            return Err(SplatError::InvalidConfig(
                "rows_per_thread must be at least 1".into(),
            ));
        }
        if self.workgroup_size < self.bin_count() {
            return Err(SplatError::InvalidConfig(format!(
                "workgroup_size {} is smaller than the {} digit bins",
                self.workgroup_size,
                self.bin_count()
            )));
        }
        Ok(())
    }

    /// Device-side checks that only make sense once limits are known.
    pub fn validate_for(&self, limits: &wgpu::Limits) -> Result<()> {
        self.validate()?;
        let max_invocations = limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x);
        if self.workgroup_size > max_invocations {
            return Err(SplatError::CapacityExceeded {
                label: "sort workgroup size",
                requested: self.workgroup_size as u64,
                limit: max_invocations as u64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone)]
pub struct RendererConfig {
    pub color_format: wgpu::TextureFormat,
    pub clear_color: wgpu::Color,
    pub gaussian_multiplier: f32,
    /// NDC half-extent a splat center may reach before it is culled. `1.0` is
    /// the exact view frustum.
    pub cull_margin: f32,
    pub sort: SortConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            clear_color: wgpu::Color::BLACK,
            gaussian_multiplier: 1.0,
            cull_margin: 1.0,
            sort: SortConfig::default(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct OverlayConfig {
    pub resolution: u32,
    pub show_bbox: bool,
    pub show_query: bool,
    pub bbox_color: [f32; 4],
    pub query_color: [f32; 4],
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            resolution: 10,
            show_bbox: true,
            show_query: true,
            bbox_color: [0.0, 1.0, 0.0, 1.0],
            query_color: [0.0, 1.0, 1.0, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sort_covers_full_key() {
        let config = SortConfig::default();
        assert_eq!(config.bin_count(), 16);
        assert_eq!(config.pass_count(), 8);
        assert!(config.pass_count() * config.bits_per_pass >= KEY_BITS);
        assert!(!config.result_in_secondary());
        assert_eq!(config.block_size(), 1024);
    }

    #[test]
    fn odd_pass_count_ends_in_secondary() {
        let config = SortConfig {
            bits_per_pass: 3,
            ..SortConfig::default()
        };
        assert_eq!(config.pass_count(), 11);
        assert!(config.result_in_secondary());

        let config = SortConfig {
            bits_per_pass: 8,
            ..SortConfig::default()
        };
        assert_eq!(config.pass_count(), 4);
        assert!(!config.result_in_secondary());
    }

    #[test]
    fn block_count_rounds_up() {
        let config = SortConfig::default();
        assert_eq!(config.block_count(0), 0);
        assert_eq!(config.block_count(1), 1);
        assert_eq!(config.block_count(1024), 1);
        assert_eq!(config.block_count(1025), 2);
    }

    #[test]
    fn rejects_bad_sort_configs() {
        let too_wide = SortConfig {
            bits_per_pass: 9,
            ..SortConfig::default()
        };
        assert!(too_wide.validate().is_err());

        let zero_bits = SortConfig {
            bits_per_pass: 0,
            ..SortConfig::default()
        };
        assert!(zero_bits.validate().is_err());

        let narrow_workgroup = SortConfig {
            bits_per_pass: 8,
            workgroup_size: 64,
            rows_per_thread: 4,
        };
        assert!(narrow_workgroup.validate().is_err());

        let no_rows = SortConfig {
            rows_per_thread: 0,
            ..SortConfig::default()
        };
        assert!(no_rows.validate().is_err());
    }
}
