//! # Utility module

use nalgebra::Point2;

/// Rasterise the line segment between two pixel coordinates.
///
/// Bresenham's algorithm; used to densify chains of projected joint positions
/// into per-pixel prior-foreground hints.
pub fn line_points(a: Point2<i32>, b: Point2<i32>) -> Vec<Point2<i32>> {
    let mut p1 = a;
    let mut p2 = b;
    let steep = (p1.y - p2.y).abs() > (p1.x - p2.x).abs();
    if steep {
        p1 = Point2::new(p1.y, p1.x);
        p2 = Point2::new(p2.y, p2.x);
    }
    if p1.x > p2.x {
        std::mem::swap(&mut p1, &mut p2);
    }

    let dx = p2.x - p1.x;
    let dy = (p2.y - p1.y).abs();
    let ystep = (p2.y - p1.y).signum();
    let mut error = dx / 2;
    let mut y = p1.y;

    let mut line = Vec::with_capacity(dx as usize + 1);
    for x in p1.x..=p2.x {
        if steep {
            line.push(Point2::new(y, x));
        } else {
            line.push(Point2::new(x, y));
        }
        error -= dy;
        if error < 0 {
            y += ystep;
            error += dx;
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_line_is_dense() {
        let line = line_points(Point2::new(2, 5), Point2::new(7, 5));
        assert_eq!(line.len(), 6);
        for (i, p) in line.iter().enumerate() {
            assert_eq!(*p, Point2::new(2 + i as i32, 5));
        }
    }

    #[test]
    fn steep_line_visits_every_row() {
        let line = line_points(Point2::new(0, 0), Point2::new(2, 9));
        let mut rows: Vec<_> = line.iter().map(|p| p.y).collect();
        rows.sort_unstable();
        rows.dedup();
        assert_eq!(rows, (0..=9).collect::<Vec<_>>());
    }

    #[test]
    fn endpoints_are_included() {
        let line = line_points(Point2::new(4, 7), Point2::new(-2, 1));
        assert!(line.contains(&Point2::new(4, 7)));
        assert!(line.contains(&Point2::new(-2, 1)));
    }
}
