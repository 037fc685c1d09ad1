//! Hand-authored level layouts.

use glam::Vec2;

/// Starting positions and obstacles of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelLayout {
    /// Units of the first player, who tries to reach the goal line.
    pub prey: Vec<Vec2>,
    /// Units of the second player, who hunts.
    pub hunters: Vec<Vec2>,
    /// Obstacles as center and radius.
    pub obstacles: Vec<(Vec2, f32)>,
}

fn points(coords: &[(f32, f32)]) -> Vec<Vec2> {
    coords.iter().map(|&(x, y)| Vec2::new(x, y)).collect()
}

fn circles(coords: &[(f32, f32, f32)]) -> Vec<(Vec2, f32)> {
    coords
        .iter()
        .map(|&(x, y, radius)| (Vec2::new(x, y), radius))
        .collect()
}

/// Number of distinct layouts. Levels outside `1..=LEVEL_COUNT` fall back to
/// level 1.
pub const LEVEL_COUNT: u32 = 5;

/// Layout for `level`.
pub fn layout(level: u32) -> LevelLayout {
    match level {
        2 => LevelLayout {
            prey: points(&[(20., 96.), (100., 80.), (180., 64.), (380., 80.), (460., 96.)]),
            hunters: points(&[(20., 360.), (100., 344.), (300., 328.), (380., 344.), (460., 360.)]),
            obstacles: circles(&[
                (240., 240., 50.),
                (0., 0., 50.),
                (0., 480., 50.),
                (480., 0., 50.),
                (480., 480., 50.),
            ]),
        },
        3 => LevelLayout {
            prey: points(&[(20., 96.), (60., 80.), (100., 64.), (420., 80.), (460., 96.)]),
            hunters: points(&[(20., 360.), (60., 344.), (380., 328.), (420., 344.), (460., 360.)]),
            obstacles: circles(&[
                (240., 0., 75.),
                (240., 480., 75.),
                (240., 80., 60.),
                (240., 400., 60.),
                (0., 240., 50.),
                (480., 240., 50.),
                (160., 240., 30.),
                (320., 240., 30.),
            ]),
        },
        4 => LevelLayout {
            prey: points(&[(340., 96.), (370., 80.), (400., 64.), (430., 80.), (460., 96.)]),
            hunters: points(&[(20., 360.), (50., 344.), (80., 328.), (110., 344.), (140., 360.)]),
            obstacles: circles(&[
                (40., 40., 100.),
                (440., 440., 100.),
                (240., 40., 75.),
                (240., 440., 75.),
                (200., 200., 30.),
                (280., 280., 30.),
            ]),
        },
        5 => LevelLayout {
            prey: points(&[(60., 80.), (150., 64.), (240., 48.), (330., 64.), (420., 80.)]),
            hunters: points(&[(100., 380.), (180., 360.), (300., 360.), (380., 380.), (240., 420.)]),
            obstacles: circles(&[
                (120., 200., 60.),
                (360., 200., 60.),
                (240., 300., 40.),
                (60., 330., 35.),
                (420., 330., 35.),
            ]),
        },
        _ => LevelLayout {
            prey: points(&[(20., 96.), (60., 96.), (100., 96.), (420., 96.), (460., 96.)]),
            hunters: points(&[(20., 360.), (60., 360.), (380., 360.), (420., 360.), (460., 360.)]),
            obstacles: circles(&[
                (44., 192., 44.),
                (132., 192., 44.),
                (436., 192., 44.),
                (348., 192., 44.),
                (216., 272., 12.),
                (264., 272., 12.),
            ]),
        },
    }
}
