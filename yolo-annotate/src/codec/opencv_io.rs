//! OpenCV `videoio` backend.
//!
//! OpenCV hands out BGR rows; everything above this module works on RGB.

use std::path::Path;

use image::RgbImage;
use opencv::core::{Mat, Scalar, Size, CV_8U, CV_8UC3};
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};

use super::{FrameWriter, Frames, VideoDecoder, VideoEncoder};
use crate::error::{DecodeError, EncodeError};

/// Container tag of every encoded video
pub const FOURCC: [char; 4] = ['m', 'p', '4', 'v'];

/// Reads and writes video files through OpenCV
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvCodec;

struct CaptureFrames {
    capture: VideoCapture,
    index: u64,
    done: bool,
}

impl CaptureFrames {
    fn close(&mut self) {
        self.done = true;
        if let Err(e) = self.capture.release() {
            log::warn!("failed to release video capture: {}", e);
        }
    }
}

impl Iterator for CaptureFrames {
    type Item = Result<RgbImage, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut mat = Mat::default();
        let frame = match self.capture.read(&mut mat) {
            // OpenCV reports end of stream and an unreadable trailing frame
            // the same way
            Ok(false) => None,
            Ok(true) if mat.rows() == 0 || mat.cols() == 0 => None,
            Ok(true) => Some(bgr_mat_to_rgb(&mat).map_err(|reason| DecodeError::Frame {
                index: self.index,
                reason,
            })),
            Err(e) => Some(Err(DecodeError::Frame {
                index: self.index,
                reason: e.to_string(),
            })),
        };
        match &frame {
            Some(Ok(_)) => self.index += 1,
            _ => self.close(),
        }
        frame
    }
}

impl Drop for CaptureFrames {
    fn drop(&mut self) {
        if !self.done {
            self.close();
        }
    }
}

impl VideoDecoder for OpenCvCodec {
    fn decode<'a>(&'a self, path: &Path) -> Result<Frames<'a>, DecodeError> {
        let open_error = |reason: String| DecodeError::OpenVideo {
            path: path.to_path_buf(),
            reason,
        };
        let filename = path
            .to_str()
            .ok_or_else(|| open_error("path is not valid UTF-8".to_string()))?;
        let capture = VideoCapture::from_file(filename, videoio::CAP_ANY)
            .map_err(|e| open_error(e.to_string()))?;
        if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("no backend could open the file".to_string()));
        }
        log::debug!("decoding {}", path.display());
        Ok(Box::new(CaptureFrames {
            capture,
            index: 0,
            done: false,
        }))
    }
}

struct OpenCvWriter {
    writer: VideoWriter,
    size: (u32, u32),
    index: u64,
}

impl FrameWriter for OpenCvWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<(), EncodeError> {
        let write_error = |reason: String| EncodeError::Write {
            index: self.index,
            reason,
        };
        let mat = rgb_to_bgr_mat(frame, self.size).map_err(write_error)?;
        self.writer
            .write(&mat)
            .map_err(|e| write_error(e.to_string()))?;
        self.index += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), EncodeError> {
        self.writer
            .release()
            .map_err(|e| EncodeError::Finish(e.to_string()))
    }
}

impl VideoEncoder for OpenCvCodec {
    fn create<'a>(
        &'a self,
        path: &Path,
        fps: f64,
        size: (u32, u32),
    ) -> Result<Box<dyn FrameWriter + 'a>, EncodeError> {
        let open_error = |reason: String| EncodeError::Open {
            path: path.to_path_buf(),
            reason,
        };
        let filename = path
            .to_str()
            .ok_or_else(|| open_error("path is not valid UTF-8".to_string()))?;
        let [c1, c2, c3, c4] = FOURCC;
        let fourcc = VideoWriter::fourcc(c1, c2, c3, c4).map_err(|e| open_error(e.to_string()))?;
        let writer = VideoWriter::new(
            filename,
            fourcc,
            fps,
            Size::new(size.0 as i32, size.1 as i32),
            true,
        )
        .map_err(|e| open_error(e.to_string()))?;
        if !writer.is_opened().map_err(|e| open_error(e.to_string()))? {
            return Err(open_error("no encoder accepted the mp4v fourcc".to_string()));
        }
        Ok(Box::new(OpenCvWriter {
            writer,
            size,
            index: 0,
        }))
    }
}

fn bgr_mat_to_rgb(mat: &Mat) -> Result<RgbImage, String> {
    if mat.depth() != CV_8U || mat.channels() != 3 {
        return Err(format!(
            "unsupported frame layout (depth {}, {} channels)",
            mat.depth(),
            mat.channels()
        ));
    }
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone().map_err(|e| e.to_string())?;
        &owned
    };
    let (width, height) = (mat.cols() as u32, mat.rows() as u32);
    let bgr = mat.data_bytes().map_err(|e| e.to_string())?;
    let mut rgb = Vec::with_capacity(bgr.len());
    for pixel in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| format!("frame buffer does not hold {width}x{height} pixels"))
}

fn rgb_to_bgr_mat(frame: &RgbImage, size: (u32, u32)) -> Result<Mat, String> {
    if frame.dimensions() != size {
        return Err(format!(
            "frame is {:?} but the writer was opened for {:?}",
            frame.dimensions(),
            size
        ));
    }
    let mut mat = Mat::new_rows_cols_with_default(
        size.1 as i32,
        size.0 as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )
    .map_err(|e| e.to_string())?;
    let bgr = mat.data_bytes_mut().map_err(|e| e.to_string())?;
    for (dst, src) in bgr.chunks_exact_mut(3).zip(frame.as_raw().chunks_exact(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(mat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use image::Rgb;

    #[test]
    fn channel_order_survives_mat_conversion() {
        let frame = RgbImage::from_fn(3, 2, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 200]));
        let mat = rgb_to_bgr_mat(&frame, (3, 2)).unwrap();
        assert_eq!(&mat.data_bytes().unwrap()[..3], &[200, 0, 0]);
        assert_eq!(bgr_mat_to_rgb(&mat).unwrap(), frame);
    }

    #[test]
    fn encoded_video_decodes_to_same_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.mp4");
        let frames: Vec<RgbImage> = (0..12u8)
            .map(|i| RgbImage::from_pixel(64, 48, Rgb([i * 20, 0, 255 - i * 20])))
            .collect();

        let video = encode(&OpenCvCodec, &frames, &path, 24.0).unwrap();
        assert_eq!(video.frames, 12);

        let decoded: Vec<RgbImage> = OpenCvCodec
            .decode(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded.len(), 12);
        assert!(decoded.iter().all(|f| f.dimensions() == (64, 48)));

        let capture = VideoCapture::from_file(path.to_str().unwrap(), videoio::CAP_ANY).unwrap();
        assert_eq!(capture.get(videoio::CAP_PROP_FPS).unwrap().round(), 24.0);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = OpenCvCodec.decode(&dir.path().join("nope.mp4"));
        assert!(matches!(result, Err(DecodeError::OpenVideo { .. })));
    }
}
