//! Integration tests for mediastage-resample.

use mediastage_core::{
    drive, ChannelLayout, Error, Frame, SampleFormat, StageSession, SubmitStatus, TimeBase, Timestamp,
};
use mediastage_resample::{ResampleConfig, ResampleStage};
use proptest::prelude::*;
use std::f64::consts::PI;

/// Generate a sine wave at a given frequency.
fn generate_sine(sample_rate: u32, frequency: f64, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin() as f32 * 0.5)
        .collect()
}

/// Calculate the RMS of a signal.
fn rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|&s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Packed f32 stereo frames carrying the same signal on both channels.
fn stereo_frames(signal: &[f32], rate: u32, chunk: usize) -> Vec<Frame> {
    let tb = TimeBase::from_sample_rate(rate);
    signal
        .chunks(chunk)
        .enumerate()
        .map(|(n, part)| {
            let mut frame = Frame::audio(SampleFormat::F32, ChannelLayout::STEREO, rate, part.len() as u32).unwrap();
            let bytes: Vec<u8> = part
                .iter()
                .flat_map(|s| [*s, *s])
                .flat_map(|s| s.to_ne_bytes())
                .collect();
            frame.plane_mut(0).unwrap().data_mut()[..bytes.len()].copy_from_slice(&bytes);
            frame.with_pts(Timestamp::new((n * chunk) as i64, tb))
        })
        .collect()
}

fn run(stage: &mut ResampleStage, frames: Vec<Frame>) -> Vec<Frame> {
    let mut out = Vec::new();
    drive(stage, frames, |f| {
        out.push(f);
        Ok::<(), Error>(())
    })
    .unwrap();
    out
}

fn left_channel(frames: &[Frame]) -> Vec<f32> {
    frames
        .iter()
        .flat_map(|f| {
            let n = f.nb_samples() as usize;
            let data = f.plane(0).unwrap().data()[..n * 8].to_vec();
            data.chunks_exact(8)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn test_44100_to_48000_fixed_frames() {
    let signal = generate_sine(44100, 440.0, 4410);
    let mut stage = ResampleStage::new(ResampleConfig::new(44100, 48000).with_frame_size(1024)).unwrap();
    stage.open().unwrap();
    let out = run(&mut stage, stereo_frames(&signal, 44100, 1000));

    let total: u32 = out.iter().map(|f| f.nb_samples()).sum();
    assert_eq!(total, 4800);
    assert!(out[..out.len() - 1].iter().all(|f| f.nb_samples() == 1024));

    let mut expected_pts = 0;
    for frame in &out {
        assert_eq!(frame.pts.value(), Some(expected_pts));
        assert_eq!(frame.pts.time_base, TimeBase::from_sample_rate(48000));
        expected_pts += i64::from(frame.nb_samples());
    }

    let input_rms = rms(&signal);
    let output_rms = rms(&left_channel(&out));
    assert!((input_rms - output_rms).abs() < 0.02, "{input_rms} vs {output_rms}");
}

#[test]
fn test_48000_to_44100_counts() {
    let signal = generate_sine(48000, 1000.0, 4801);
    let mut stage = ResampleStage::new(ResampleConfig::new(48000, 44100)).unwrap();
    stage.open().unwrap();
    let out = run(&mut stage, stereo_frames(&signal, 48000, 480));
    let total: u32 = out.iter().map(|f| f.nb_samples()).sum();
    // ceil(4801 * 147 / 160)
    assert_eq!(total, 4411);
}

#[test]
fn test_planar_surround_downmix_to_s16_stereo() {
    let mut stage = ResampleStage::new(
        ResampleConfig::new(48000, 48000)
            .with_input_format(SampleFormat::F32p, ChannelLayout::SURROUND_5_1)
            .with_output_format(SampleFormat::S16, ChannelLayout::STEREO),
    )
    .unwrap();
    stage.open().unwrap();

    let mut frame = Frame::audio(SampleFormat::F32p, ChannelLayout::SURROUND_5_1, 48000, 16).unwrap();
    for ch in 0..6 {
        let bytes: Vec<u8> = (0..16).flat_map(|_| 1.0f32.to_ne_bytes()).collect();
        frame.plane_mut(ch).unwrap().data_mut()[..64].copy_from_slice(&bytes);
    }
    let out = run(&mut stage, vec![frame]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].sample_format(), Some(SampleFormat::S16));
    let data = out[0].plane(0).unwrap().data();
    for pair in data[..64].chunks_exact(2) {
        let v = i16::from_ne_bytes([pair[0], pair[1]]);
        assert!(v > 30000, "{v}");
    }
}

#[test]
fn test_ended_after_flush() {
    let mut stage = ResampleStage::new(ResampleConfig::new(48000, 48000)).unwrap();
    stage.open().unwrap();
    assert_eq!(stage.submit(None).unwrap(), SubmitStatus::Accepted);
    assert!(stage.drain().unwrap().is_eof());
    assert_eq!(stage.submit(None).unwrap(), SubmitStatus::Ended);
}

proptest! {
    #[test]
    fn prop_output_length_matches_rate_ratio(
        input_rate in prop::sample::select(vec![8000u32, 22050, 44100, 48000, 96000]),
        output_rate in prop::sample::select(vec![8000u32, 16000, 44100, 48000]),
        samples in 1usize..3000,
        chunk in 1usize..700,
    ) {
        let signal = vec![0.25f32; samples];
        let mut stage = ResampleStage::new(ResampleConfig::new(input_rate, output_rate)).unwrap();
        stage.open().unwrap();
        let out = run(&mut stage, stereo_frames(&signal, input_rate, chunk));
        let total: u64 = out.iter().map(|f| u64::from(f.nb_samples())).sum();
        let expected = (samples as u64 * u64::from(output_rate)).div_ceil(u64::from(input_rate));
        prop_assert_eq!(total, expected);
    }
}
