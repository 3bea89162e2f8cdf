//! Extract motion segmentation masks to .pgm files

use clap::*;
use motseg::prelude::v1::{Result, *};
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::path::Path;

/// Nominal focal length used to back-project depth when no calibration is
/// stored alongside the stream.
const FOCAL_LENGTH: f32 = 525.0;

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("motseg-extract")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .long("input")
                .short('i')
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .required(false),
        )
        .arg(Arg::new("output").takes_value(true).required(true))
        .get_matches();

    let input = matches.value_of("input").unwrap();
    let output = matches.value_of("output").unwrap();

    let mut reader = open_input(input)?;
    let width = read_u32(&mut reader)? as usize;
    let height = read_u32(&mut reader)? as usize;
    if width == 0 || height == 0 {
        return Err(anyhow!("invalid stream dimensions {}x{}", width, height));
    }

    let config = match matches.value_of("config") {
        Some(path) => TrackerConfig::load(path)?,
        None => open_config(width, height),
    };

    std::fs::create_dir_all(output)?;

    let mut tracker = MotionTracker::new(
        config,
        Box::new(StaticPlane(Point3::new(0.0, 0.0, 1.0))),
        Box::new(InstantCalibration(CameraInfo {
            fx: FOCAL_LENGTH,
            fy: FOCAL_LENGTH,
            cx: (width as f32 - 1.0) / 2.0,
            cy: (height as f32 - 1.0) / 2.0,
        })),
    )?;
    tracker.start();

    let mut cnt = 0usize;

    while let Some(input) = read_input(&mut reader, width, height)? {
        if let Some(out) = tracker.process(input, &[])? {
            write_pgm(&format!("{output}/{cnt:06}.pgm"), &out.mask)?;
            cnt += 1;
        }
    }

    log::info!("wrote {} masks", cnt);

    Ok(())
}

/// Open a `.mseg` stream from a file path or a `tcp://host:port` address.
fn open_input(input: &str) -> Result<BufReader<Box<dyn Read>>> {
    let stream: Box<dyn Read> = match input.strip_prefix("tcp://") {
        Some(addr) => Box::new(TcpStream::connect(addr)?),
        None => Box::new(File::open(input)?),
    };
    Ok(BufReader::new(stream))
}

/// Permissive defaults covering the whole image and a generous 3D volume.
fn open_config(width: usize, height: usize) -> TrackerConfig {
    TrackerConfig {
        bounds: WorkspaceBounds {
            min_x: -100.0,
            max_x: 100.0,
            min_y: -100.0,
            max_y: 100.0,
            min_z: 0.01,
            max_z: 100.0,
            crop_min_x: 0,
            crop_max_x: width - 1,
            crop_min_y: 0,
            crop_max_y: height - 1,
        },
        ..Default::default()
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read one frame triple from the stream, or `None` on a clean end-of-stream.
///
/// Per frame the stream holds `w * h * 3` interleaved RGB bytes followed by
/// `w * h` little-endian f32 depth values in metres. The point cloud is
/// back-projected from depth with the nominal intrinsics.
fn read_input(reader: &mut impl Read, width: usize, height: usize) -> Result<Option<SensorInput>> {
    let mut rgb = vec![0u8; width * height * 3];
    match reader.read_exact(&mut rgb) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut depth_raw = vec![0u8; width * height * 4];
    reader.read_exact(&mut depth_raw)?;

    let color = [0usize, 1, 2].map(|ch| {
        Plane::from_fn(height, width, |r, c| {
            rgb[(r * width + c) * 3 + ch] as f32 / 255.0
        })
    });
    let depth = Plane::from_fn(height, width, |r, c| {
        let i = (r * width + c) * 4;
        let bytes = [depth_raw[i], depth_raw[i + 1], depth_raw[i + 2], depth_raw[i + 3]];
        f32::from_le_bytes(bytes)
    });

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let points = (0..width * height)
        .map(|i| {
            let (r, c) = (i / width, i % width);
            let z = depth[(r, c)];
            Point3::new(
                (c as f32 - cx) * z / FOCAL_LENGTH,
                (r as f32 - cy) * z / FOCAL_LENGTH,
                z,
            )
        })
        .collect();
    let cloud = PointCloud::new(points, width, height);

    Ok(Some(SensorInput::new(color, depth, cloud)))
}

/// Write a binary (P5) PGM image.
fn write_pgm(path: impl AsRef<Path>, mask: &nalgebra::DMatrix<u8>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write!(writer, "P5\n{} {}\n255\n", mask.ncols(), mask.nrows())?;
    for r in 0..mask.nrows() {
        for c in 0..mask.ncols() {
            writer.write_all(&[mask[(r, c)]])?;
        }
    }
    Ok(())
}
