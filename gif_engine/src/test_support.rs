//! GIF fixtures for unit tests

use image::codecs::gif::GifEncoder;
pub(crate) use image::codecs::gif::Repeat;
use image::{Delay, Frame, Rgba, RgbaImage};

/// Solid colors given to consecutive frames so tests can tell them apart.
pub(crate) const FRAME_COLORS: [[u8; 4]; 4] = [
    [255, 0, 0, 255],
    [0, 255, 0, 255],
    [0, 0, 255, 255],
    [255, 255, 0, 255],
];

/// Encodes a GIF with one solid frame per entry of `durations_ms`.
pub(crate) fn encode_gif(width: u32, height: u32, durations_ms: &[u32], repeat: Option<Repeat>) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        if let Some(repeat) = repeat {
            encoder.set_repeat(repeat).unwrap();
        }
        let frames = durations_ms.iter().enumerate().map(|(i, &ms)| {
            let image = RgbaImage::from_pixel(width, height, Rgba(frame_color(i)));
            Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(ms, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }
    bytes
}

pub(crate) fn frame_color(index: usize) -> [u8; 4] {
    FRAME_COLORS[index % FRAME_COLORS.len()]
}

/// The three frame, 100/150/200 ms animation used across playback tests.
pub(crate) fn three_frame_gif(repeat: Option<Repeat>) -> Vec<u8> {
    encode_gif(4, 4, &[100, 150, 200], repeat)
}

/// Gives frame `target` an invalid LZW minimum code size. The block layout
/// stays intact, so only decoding that frame fails.
pub(crate) fn corrupt_frame(mut data: Vec<u8>, target: usize) -> Vec<u8> {
    let mut pos = 13;
    if data[10] & 0x80 != 0 {
        pos += 3 << ((data[10] & 0x07) + 1);
    }

    let mut frame = 0;
    loop {
        match data[pos] {
            0x21 => pos = skip_sub_blocks(&data, pos + 2),
            0x2C => {
                let packed = data[pos + 9];
                pos += 10;
                if packed & 0x80 != 0 {
                    pos += 3 << ((packed & 0x07) + 1);
                }
                if frame == target {
                    data[pos] = 0x0F;
                    return data;
                }
                pos = skip_sub_blocks(&data, pos + 1);
                frame += 1;
            }
            other => panic!("unexpected block {other:#04x} at {pos}"),
        }
    }
}

fn skip_sub_blocks(data: &[u8], mut pos: usize) -> usize {
    while data[pos] != 0 {
        pos += data[pos] as usize + 1;
    }
    pos + 1
}
