//! ShapeNet-part dataset reader.
//!
//! Expected layout under the dataset root:
//!
//! ```text
//! synsetoffset2category.txt                  "Chair\t03001627" per line
//! train_test_split/shuffled_train_file_list.json
//! train_test_split/shuffled_test_file_list.json
//! train_test_split/shuffled_val_file_list.json
//! <synset>/points/<shape>.pts                "x y z" per line
//! <synset>/points_label/<shape>.seg          one 1-indexed part id per line
//! num_seg_classes.txt                        optional "Chair\t4" overrides
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::{SegSample, SegmentationSource};
use crate::error::{Result, SegError};

/// Standard deviation of the per-coordinate jitter added by augmentation.
const JITTER_STD: f32 = 0.02;

/// Part counts for the 16 ShapeNet-part categories.
const SEG_CLASS_TABLE: &[(&str, usize)] = &[
    ("Airplane", 4),
    ("Bag", 2),
    ("Cap", 2),
    ("Car", 4),
    ("Chair", 4),
    ("Earphone", 3),
    ("Guitar", 3),
    ("Knife", 2),
    ("Lamp", 4),
    ("Laptop", 2),
    ("Motorbike", 6),
    ("Mug", 2),
    ("Pistol", 3),
    ("Rocket", 3),
    ("Skateboard", 3),
    ("Table", 3),
];

/// Dataset split, selecting one of the shuffled file lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
    Val,
}

impl Split {
    fn file_list(self) -> &'static str {
        match self {
            Split::Train => "shuffled_train_file_list.json",
            Split::Test => "shuffled_test_file_list.json",
            Split::Val => "shuffled_val_file_list.json",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Test => write!(f, "test"),
            Split::Val => write!(f, "val"),
        }
    }
}

#[derive(Debug, Clone)]
struct ShapeFiles {
    points: PathBuf,
    labels: PathBuf,
}

/// One category of one split of a ShapeNet-part dataset, configured for
/// per-point segmentation labels.
#[derive(Debug)]
pub struct ShapeNetPartDataset {
    shapes: Vec<ShapeFiles>,
    num_seg_classes: usize,
    npoints: usize,
    augment: bool,
}

impl ShapeNetPartDataset {
    /// Index the shapes of `class_choice` in `split`.
    ///
    /// Only the file lists are read here; point files are read lazily by `get`.
    pub fn open(
        root: &Path,
        class_choice: &str,
        split: Split,
        augment: bool,
        npoints: usize,
    ) -> Result<Self> {
        let categories = read_categories(&root.join("synsetoffset2category.txt"))?;
        let synset = categories.get(class_choice).ok_or_else(|| {
            SegError::Configuration(format!(
                "unknown class '{class_choice}' (known: {})",
                sorted_keys(&categories)
            ))
        })?;

        let num_seg_classes = resolve_seg_classes(root, class_choice)?;

        let list_path = root.join("train_test_split").join(split.file_list());
        let text = std::fs::read_to_string(&list_path).map_err(|e| SegError::io(&list_path, e))?;
        let entries: Vec<String> = serde_json::from_str(&text).map_err(|e| {
            SegError::Data(format!("bad file list {}: {e}", list_path.display()))
        })?;

        let mut shapes = Vec::new();
        for entry in &entries {
            // "shape_data/<synset>/<shape_id>"
            let mut parts = entry.split('/').skip(1);
            let (Some(entry_synset), Some(shape_id)) = (parts.next(), parts.next()) else {
                return Err(SegError::Data(format!(
                    "malformed entry '{entry}' in {}",
                    list_path.display()
                )));
            };
            if entry_synset != synset {
                continue;
            }
            let dir = root.join(entry_synset);
            shapes.push(ShapeFiles {
                points: dir.join("points").join(format!("{shape_id}.pts")),
                labels: dir.join("points_label").join(format!("{shape_id}.seg")),
            });
        }

        if shapes.is_empty() {
            return Err(SegError::Data(format!(
                "no shapes of class '{class_choice}' in {split} split"
            )));
        }

        tracing::info!(
            class = class_choice,
            %split,
            shapes = shapes.len(),
            num_seg_classes,
            augment,
            "Indexed ShapeNet-part split"
        );

        Ok(Self {
            shapes,
            num_seg_classes,
            npoints,
            augment,
        })
    }
}

impl SegmentationSource for ShapeNetPartDataset {
    fn len(&self) -> usize {
        self.shapes.len()
    }

    fn num_seg_classes(&self) -> usize {
        self.num_seg_classes
    }

    fn points_per_shape(&self) -> usize {
        self.npoints
    }

    fn get(&self, index: usize, seed: u64) -> Result<SegSample> {
        let files = self.shapes.get(index).ok_or_else(|| {
            SegError::Data(format!("index {index} out of range ({} shapes)", self.shapes.len()))
        })?;

        let points = parse_points(&files.points)?;
        let labels = parse_labels(&files.labels)?;
        if points.len() != labels.len() {
            return Err(SegError::Data(format!(
                "{} has {} points but {} has {} labels",
                files.points.display(),
                points.len(),
                files.labels.display(),
                labels.len()
            )));
        }
        if points.is_empty() {
            return Err(SegError::Data(format!("{} is empty", files.points.display())));
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut sample = resample(&points, &labels, self.npoints, &mut rng);
        normalize_unit_sphere(&mut sample.points);
        if self.augment {
            let theta = rng.gen_range(0.0..std::f32::consts::TAU);
            rotate_up_axis(&mut sample.points, theta);
            jitter(&mut sample.points, JITTER_STD, &mut rng);
        }
        Ok(sample)
    }
}

fn sorted_keys(map: &HashMap<String, String>) -> String {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys.join(", ")
}

fn read_categories(path: &Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
    let mut categories = HashMap::new();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        if let (Some(name), Some(synset)) = (fields.next(), fields.next()) {
            categories.insert(name.to_string(), synset.to_string());
        }
    }
    Ok(categories)
}

/// Part-class count for a category: `num_seg_classes.txt` in the root wins,
/// then the built-in table.
fn resolve_seg_classes(root: &Path, class_choice: &str) -> Result<usize> {
    let override_path = root.join("num_seg_classes.txt");
    if override_path.exists() {
        let text = std::fs::read_to_string(&override_path)
            .map_err(|e| SegError::io(&override_path, e))?;
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            if fields.next() == Some(class_choice) {
                return fields
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        SegError::Data(format!(
                            "bad class count for '{class_choice}' in {}",
                            override_path.display()
                        ))
                    });
            }
        }
    }
    SEG_CLASS_TABLE
        .iter()
        .find(|(name, _)| *name == class_choice)
        .map(|&(_, n)| n)
        .ok_or_else(|| {
            SegError::Configuration(format!("no part-class count known for '{class_choice}'"))
        })
}

fn parse_points(path: &Path) -> Result<Vec<[f32; 3]>> {
    let text = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
    let mut points = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let coords: Vec<f32> = line
            .split_whitespace()
            .map(str::parse::<f32>)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                SegError::Data(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
        let [x, y, z] = coords[..] else {
            return Err(SegError::Data(format!(
                "{}:{}: expected 3 coordinates, got {}",
                path.display(),
                line_no + 1,
                coords.len()
            )));
        };
        points.push([x, y, z]);
    }
    Ok(points)
}

fn parse_labels(path: &Path) -> Result<Vec<i64>> {
    let text = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            line.trim().parse::<i64>().map_err(|e| {
                SegError::Data(format!("{}:{}: {e}", path.display(), line_no + 1))
            })
        })
        .collect()
}

/// Draw `npoints` points (with replacement) and their labels.
pub fn resample(
    points: &[[f32; 3]],
    labels: &[i64],
    npoints: usize,
    rng: &mut impl Rng,
) -> SegSample {
    let mut out = SegSample {
        points: Vec::with_capacity(npoints),
        labels: Vec::with_capacity(npoints),
    };
    for _ in 0..npoints {
        let i = rng.gen_range(0..points.len());
        out.points.push(points[i]);
        out.labels.push(labels[i]);
    }
    out
}

/// Center on the centroid and scale so the farthest point has norm 1.
pub fn normalize_unit_sphere(points: &mut [[f32; 3]]) {
    if points.is_empty() {
        return;
    }
    let n = points.len() as f32;
    let mut centroid = [0.0f32; 3];
    for p in points.iter() {
        for k in 0..3 {
            centroid[k] += p[k] / n;
        }
    }
    let mut max_norm = 0.0f32;
    for p in points.iter_mut() {
        for k in 0..3 {
            p[k] -= centroid[k];
        }
        max_norm = max_norm.max((p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt());
    }
    if max_norm > 0.0 {
        for p in points.iter_mut() {
            for c in p.iter_mut() {
                *c /= max_norm;
            }
        }
    }
}

/// Rotate about the vertical (y) axis, mixing x and z.
pub fn rotate_up_axis(points: &mut [[f32; 3]], theta: f32) {
    let (sin, cos) = theta.sin_cos();
    for p in points.iter_mut() {
        let (x, z) = (p[0], p[2]);
        p[0] = x * cos + z * sin;
        p[2] = -x * sin + z * cos;
    }
}

/// Add zero-mean Gaussian noise to every coordinate.
pub fn jitter(points: &mut [[f32; 3]], std: f32, rng: &mut impl Rng) {
    // Negative or NaN std leaves the points unchanged.
    let Ok(normal) = Normal::new(0.0f32, std) else {
        return;
    };
    for p in points.iter_mut() {
        for c in p.iter_mut() {
            *c += normal.sample(rng);
        }
    }
}
