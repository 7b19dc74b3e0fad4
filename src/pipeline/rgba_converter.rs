use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Pixel layouts a capture backend may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

#[cfg(feature = "camera-nokhwa")]
impl From<nokhwa::utils::FrameFormat> for SourceFormat {
    fn from(format: nokhwa::utils::FrameFormat) -> Self {
        use nokhwa::utils::FrameFormat;
        match format {
            FrameFormat::NV12 => SourceFormat::Nv12,
            FrameFormat::YUYV => SourceFormat::Yuyv,
            FrameFormat::MJPEG => SourceFormat::Mjpeg,
            FrameFormat::RAWRGB => SourceFormat::Rgb,
            FrameFormat::RAWBGR => SourceFormat::Bgr,
            FrameFormat::GRAY => SourceFormat::Gray,
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
pub fn convert_camera_frame(buffer: &nokhwa::Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    convert(
        buffer.source_frame_format().into(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

/// Converts one captured buffer into an RGBA video frame.
pub fn convert(format: SourceFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let rgba = match format {
        SourceFormat::Mjpeg => return decode_mjpeg(data),
        SourceFormat::Nv12 => nv12_to_rgba(data, width, height)?,
        SourceFormat::Yuyv => yuyv_to_rgba(data, width, height)?,
        SourceFormat::Rgb | SourceFormat::Bgr | SourceFormat::Gray => {
            expand_packed(format, data, width, height)?
        }
    };
    Ok(Frame::new(rgba, width, height))
}

fn ensure_len(label: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{label} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_len = width as usize * height as usize;
    let uv_len = y_len / 2;
    ensure_len("NV12", data, y_len + uv_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..y_len + uv_len],
        uv_stride: width,
        width,
        height,
    };
    let mut rgba = vec![0u8; y_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    ensure_len("YUYV", data, pixels * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    let mut rgba = vec![0u8; pixels * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422 to RGBA failed: {err:?}"))?;
    Ok(rgba)
}

/// MJPEG frames carry their own dimensions; those win over the negotiated ones.
fn decode_mjpeg(data: &[u8]) -> Result<Frame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let (width, height) = (info.width as u32, info.height as u32);
    let expected = width as usize * height as usize * 4;
    if rgba.len() < expected {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {expected}",
            rgba.len()
        ));
    }
    Ok(Frame::new(rgba, width, height))
}

fn expand_packed(format: SourceFormat, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let channels = if format == SourceFormat::Gray { 1 } else { 3 };
    ensure_len(&format!("{format:?}"), data, pixels * channels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data.par_chunks_exact(channels))
        .for_each(|(dst, src)| {
            let [r, g, b] = match format {
                SourceFormat::Bgr => [src[2], src[1], src[0]],
                SourceFormat::Gray => [src[0]; 3],
                _ => [src[0], src[1], src[2]],
            };
            dst.copy_from_slice(&[r, g, b, 255]);
        });
    Ok(rgba)
}
