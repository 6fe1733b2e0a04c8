//! 学習時のデータ拡張
//!
//! 回転・シフト・せん断・ズームを1つのアフィン変換にまとめ、
//! 出力画素から入力座標を逆算してバイリニア補間で取得します。
//! 画像外の座標は最も近い端の画素で埋めます。

use image::{Rgb, RgbImage};
use rand::Rng;

use crate::model::AugmentationSettings;

type Mat3 = [[f32; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn matmul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0f32; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// 1枚分の変換パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// 回転角（度）
    pub theta: f32,
    /// 行方向のシフト（ピクセル）
    pub tx: f32,
    /// 列方向のシフト（ピクセル）
    pub ty: f32,
    /// せん断角（度）
    pub shear: f32,
    /// 行方向のズーム率
    pub zx: f32,
    /// 列方向のズーム率
    pub zy: f32,
    /// 左右反転
    pub flip_horizontal: bool,
}

impl Default for AffineParams {
    fn default() -> Self {
        Self {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
        }
    }
}

impl AffineParams {
    /// 出力座標 (row, col) -> 入力座標 への変換行列（画像中心基準）
    pub fn matrix(&self, width: u32, height: u32) -> Mat3 {
        let theta = self.theta.to_radians();
        let shear = self.shear.to_radians();

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [[1.0, 0.0, self.tx], [0.0, 1.0, self.ty], [0.0, 0.0, 1.0]];
        let shear_m = [[1.0, -shear.sin(), 0.0], [0.0, shear.cos(), 0.0], [0.0, 0.0, 1.0]];
        let zoom = [[self.zx, 0.0, 0.0], [0.0, self.zy, 0.0], [0.0, 0.0, 1.0]];

        let m = matmul(&matmul(&matmul(&rotation, &shift), &shear_m), &zoom);

        let o_r = height as f32 / 2.0 - 0.5;
        let o_c = width as f32 / 2.0 - 0.5;
        let offset = [[1.0, 0.0, o_r], [0.0, 1.0, o_c], [0.0, 0.0, 1.0]];
        let reset = [[1.0, 0.0, -o_r], [0.0, 1.0, -o_c], [0.0, 0.0, 1.0]];

        matmul(&matmul(&offset, &m), &reset)
    }

    /// 幾何変換なし（反転のみの可能性あり）
    fn is_identity_transform(&self, width: u32, height: u32) -> bool {
        let m = self.matrix(width, height);
        m.iter()
            .flatten()
            .zip(IDENTITY.iter().flatten())
            .all(|(a, b)| (a - b).abs() < 1e-6)
    }
}

/// 端の画素で埋めるバイリニア補間
fn sample_bilinear(img: &RgbImage, row: f32, col: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let max_r = (height - 1) as f32;
    let max_c = (width - 1) as f32;
    let r = row.clamp(0.0, max_r);
    let c = col.clamp(0.0, max_c);

    let r0 = r.floor();
    let c0 = c.floor();
    let r1 = (r0 + 1.0).min(max_r);
    let c1 = (c0 + 1.0).min(max_c);
    let fr = r - r0;
    let fc = c - c0;

    let p = |rr: f32, cc: f32| img.get_pixel(cc as u32, rr as u32);
    let (p00, p01, p10, p11) = (p(r0, c0), p(r0, c1), p(r1, c0), p(r1, c1));

    let mut out = [0u8; 3];
    for (ch, value) in out.iter_mut().enumerate() {
        let top = p00[ch] as f32 * (1.0 - fc) + p01[ch] as f32 * fc;
        let bottom = p10[ch] as f32 * (1.0 - fc) + p11[ch] as f32 * fc;
        *value = (top * (1.0 - fr) + bottom * fr).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// ランダムなデータ拡張を行う
#[derive(Debug, Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        Self { settings }
    }

    /// 設定範囲内でパラメータをサンプリング
    pub fn sample_params<R: Rng + ?Sized>(&self, rng: &mut R, width: u32, height: u32) -> AffineParams {
        let s = &self.settings;
        let symmetric = |rng: &mut R, range: f32| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let theta = symmetric(rng, s.rotation_range);
        let tx = symmetric(rng, s.height_shift_range) * height as f32;
        let ty = symmetric(rng, s.width_shift_range) * width as f32;
        let shear = symmetric(rng, s.shear_range);
        let (zx, zy) = if s.zoom_range > 0.0 {
            let low = 1.0 - s.zoom_range;
            let high = 1.0 + s.zoom_range;
            (rng.gen_range(low..=high), rng.gen_range(low..=high))
        } else {
            (1.0, 1.0)
        };
        let flip_horizontal = s.horizontal_flip && rng.gen_bool(0.5);

        AffineParams {
            theta,
            tx,
            ty,
            shear,
            zx,
            zy,
            flip_horizontal,
        }
    }

    /// 変換を適用
    pub fn apply(&self, img: &RgbImage, params: &AffineParams) -> RgbImage {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return img.clone();
        }

        let mut out = if params.is_identity_transform(width, height) {
            img.clone()
        } else {
            let m = params.matrix(width, height);
            RgbImage::from_fn(width, height, |x, y| {
                let (r, c) = (y as f32, x as f32);
                let src_r = m[0][0] * r + m[0][1] * c + m[0][2];
                let src_c = m[1][0] * r + m[1][1] * c + m[1][2];
                sample_bilinear(img, src_r, src_c)
            })
        };

        if params.flip_horizontal {
            image::imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }

    /// ランダムに拡張した画像を返す
    pub fn augment<R: Rng + ?Sized>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let (width, height) = img.dimensions();
        let params = self.sample_params(rng, width, height);
        self.apply(img, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 7]))
    }

    fn no_augmentation() -> AugmentationSettings {
        AugmentationSettings {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    #[test]
    fn test_identity_params_keep_image() {
        let img = gradient(8, 6);
        let augmenter = Augmenter::new(AugmentationSettings::default());
        assert_eq!(augmenter.apply(&img, &AffineParams::default()), img);
    }

    #[test]
    fn test_disabled_settings_never_change_image() {
        let img = gradient(9, 9);
        let augmenter = Augmenter::new(no_augmentation());
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..5 {
            assert_eq!(augmenter.augment(&img, &mut rng), img);
        }
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = gradient(5, 3);
        let augmenter = Augmenter::new(AugmentationSettings::default());
        let params = AffineParams {
            flip_horizontal: true,
            ..AffineParams::default()
        };
        let flipped = augmenter.apply(&img, &params);
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(flipped.get_pixel(x, y), img.get_pixel(4 - x, y));
            }
        }
    }

    #[test]
    fn test_column_shift_fills_with_edge_pixels() {
        let img = gradient(6, 4);
        let augmenter = Augmenter::new(AugmentationSettings::default());
        let params = AffineParams {
            ty: 2.0,
            ..AffineParams::default()
        };
        let shifted = augmenter.apply(&img, &params);
        for y in 0..4 {
            for x in 0..6u32 {
                let src_x = (x + 2).min(5);
                assert_eq!(shifted.get_pixel(x, y), img.get_pixel(src_x, y));
            }
        }
    }

    #[test]
    fn test_sampled_params_stay_in_range() {
        let settings = AugmentationSettings::default();
        let augmenter = Augmenter::new(settings.clone());
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let p = augmenter.sample_params(&mut rng, 150, 100);
            assert!(p.theta.abs() <= settings.rotation_range);
            assert!(p.tx.abs() <= settings.height_shift_range * 100.0 + 1e-4);
            assert!(p.ty.abs() <= settings.width_shift_range * 150.0 + 1e-4);
            assert!(p.shear.abs() <= settings.shear_range);
            assert!((0.9..=1.1).contains(&p.zx));
            assert!((0.9..=1.1).contains(&p.zy));
        }
    }

    #[test]
    fn test_augment_keeps_dimensions() {
        let img = gradient(20, 12);
        let augmenter = Augmenter::new(AugmentationSettings::default());
        let mut rng = StdRng::seed_from_u64(7);
        let out = augmenter.augment(&img, &mut rng);
        assert_eq!(out.dimensions(), (20, 12));
    }
}
