/// 归一化时加在模长上的常数，避免零向量除零
pub const NORM_EPSILON: f32 = 1e-10;

/// 判断向量是否已归一化时允许的误差
pub const NORM_TOLERANCE: f32 = 1e-4;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2 归一化，归一化后内积即为余弦相似度
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

pub fn normalize_in_place(v: &mut [f32]) {
    let scale = 1.0 / (l2_norm(v) + NORM_EPSILON);
    v.iter_mut().for_each(|x| *x *= scale);
}

pub fn is_normalized(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() < NORM_TOLERANCE
}
