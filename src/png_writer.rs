use crate::error::Result;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub fn save_png_rgba8(path: impl AsRef<Path>, w: u32, h: u32, rgba: &[u8]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let wtr = BufWriter::new(file);

    let mut encoder = png::Encoder::new(wtr, w, h);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba)?;
    writer.finish()?;
    Ok(())
}
