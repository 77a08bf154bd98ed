use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

use crate::models::Blob;

/// Find foreground blobs (non-zero pixels) using connected components
pub fn find_blobs(binary: &GrayImage, min_area: u32) -> Vec<Blob> {
    let labeled = connected_components(binary, Connectivity::Eight, Luma([0]));

    let mut regions: HashMap<u32, Blob> = HashMap::new();

    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue; // Skip background
        }

        regions
            .entry(label_val)
            .and_modify(|b| {
                b.min_x = b.min_x.min(x);
                b.min_y = b.min_y.min(y);
                b.max_x = b.max_x.max(x);
                b.max_y = b.max_y.max(y);
                b.pixel_count += 1;
                b.sum_x += x as u64;
                b.sum_y += y as u64;
            })
            .or_insert(Blob {
                label: label_val,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixel_count: 1,
                sum_x: x as u64,
                sum_y: y as u64,
            });
    }

    let mut blobs: Vec<Blob> = regions
        .into_values()
        .filter(|b| b.pixel_count >= min_area)
        .collect();
    blobs.sort_by_key(|b| b.label);
    blobs
}

/// Pick the pupil among candidate blobs: the largest one that is not a thin
/// streak (eyelash lines, crop borders).
pub fn select_pupil(blobs: &[Blob]) -> Option<&Blob> {
    blobs
        .iter()
        .filter(|b| {
            let aspect = b.aspect_ratio();
            (0.3..=3.0).contains(&aspect) && b.fill_ratio() >= 0.3
        })
        .max_by_key(|b| (b.area(), std::cmp::Reverse(b.label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    #[test]
    fn finds_separate_blobs_with_centroids() {
        let mut img = GrayImage::new(40, 20);
        draw_filled_rect_mut(&mut img, Rect::at(2, 2).of_size(4, 4), Luma([255u8]));
        draw_filled_circle_mut(&mut img, (25, 10), 5, Luma([255u8]));

        let blobs = find_blobs(&img, 1);
        assert_eq!(blobs.len(), 2);

        let square = blobs.iter().find(|b| b.min_x == 2).unwrap();
        assert_eq!(square.area(), 16);
        let c = square.centroid();
        assert!((c.x - 3.5).abs() < 1e-9 && (c.y - 3.5).abs() < 1e-9);

        let disc = select_pupil(&blobs).unwrap();
        let c = disc.centroid();
        assert!((c.x - 25.0).abs() < 1e-9 && (c.y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn min_area_drops_specks() {
        let mut img = GrayImage::new(10, 10);
        img.put_pixel(5, 5, Luma([255]));
        assert!(find_blobs(&img, 2).is_empty());
    }

    #[test]
    fn thin_streak_is_not_a_pupil() {
        let mut img = GrayImage::new(40, 10);
        draw_filled_rect_mut(&mut img, Rect::at(0, 0).of_size(40, 1), Luma([255u8]));
        let blobs = find_blobs(&img, 1);
        assert_eq!(blobs.len(), 1);
        assert!(select_pupil(&blobs).is_none());
    }
}
