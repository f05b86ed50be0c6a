use std::fs;
use std::process::Command;

use beamform::{Dataset, ScanlinePairs};
use ndarray::{Array2, Array3};
use tempfile::tempdir;

fn write_dataset(dir: &std::path::Path) -> std::path::PathBuf {
    // Two points: the first sees sample 1 of every scanline, the second looks past the window.
    let pairs = ScanlinePairs::hmc(2);
    let mut scanlines = Array3::<f32>::zeros((pairs.len(), 4, 2));
    for scan in 0..pairs.len() {
        scanlines[[scan, 1, 0]] = 1.0;
        scanlines[[scan, 1, 1]] = 0.5;
    }
    let mut times = Array2::<f32>::from_elem((2, 2), 0.5);
    times.row_mut(1).fill(50.0);

    let dataset = Dataset {
        scanlines,
        pairs,
        lookup_times_tx: times.clone(),
        lookup_times_rx: times,
        amplitudes_tx: Array2::ones((2, 2)),
        amplitudes_rx: Array2::from_elem((2, 2), 2.0),
        invdt: 1.0,
        t0: 0.0,
        fillvalue: -9.0,
    };
    dataset.save(dir).expect("save dataset")
}

#[test]
fn cli_reconstructs_and_writes_tsv() {
    let tmp = tempdir().expect("temporary directory");
    let manifest = write_dataset(tmp.path());

    let exe = env!("CARGO_BIN_EXE_beamform");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            manifest.to_str().expect("path str"),
            "--chunk-size",
            "1",
            "--threads",
            "2",
        ])
        .status()
        .expect("run beamform cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let out = tmp.path().join("dataset.tfm.tsv");
    let text = fs::read_to_string(&out).expect("output written");
    assert_eq!(
        text,
        "#POINT\tREAL\tIMAG\tMASK\n0\t6.0\t3.0\t1\n1\t0.0\t0.0\t0\n"
    );

    // A second run must refuse to overwrite the existing output.
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .arg(manifest.to_str().expect("path str"))
        .status()
        .expect("run beamform cli");
    assert!(!status.success());
}

#[test]
fn cli_applies_fillvalue_to_masked_points() {
    let tmp = tempdir().expect("temporary directory");
    let manifest = write_dataset(tmp.path());
    let out = tmp.path().join("filled.tsv");

    let exe = env!("CARGO_BIN_EXE_beamform");
    let status = Command::new(exe)
        .args([
            manifest.to_str().expect("path str"),
            "--out",
            out.to_str().expect("path str"),
            "--apply-fillvalue",
        ])
        .status()
        .expect("run beamform cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let text = fs::read_to_string(&out).expect("output written");
    let last = text.lines().last().expect("at least one line");
    assert_eq!(last, "1\t-9.0\t0.0\t0");
}

#[test]
fn cli_fails_cleanly_on_missing_manifest() {
    let tmp = tempdir().expect("temporary directory");
    let exe = env!("CARGO_BIN_EXE_beamform");
    let output = Command::new(exe)
        .arg(tmp.path().join("absent.toml"))
        .output()
        .expect("run beamform cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.toml"), "stderr: {stderr}");
}
