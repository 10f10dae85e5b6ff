//! 模糊匹配评分（0-100）
//!
//! 分数 = 2·LCS / (|a| + |b|)，等价于插入/删除编辑距离归一化。LCS 用位并行算法计算（每 64 个模式字符一个字），
//! partial_ratio 取较短串对较长串所有等长窗口的最高分，总代价 O(|long|·|short|·⌈|short|/64⌉)。
//! 比较前统一小写，按字符（而非字节）计算，适用于中日韩文本。

use std::collections::HashMap;

/// 模式串的位掩码表：字符 → 出现位置的位向量
struct Pattern {
    masks: HashMap<char, Vec<u64>>,
    len: usize,
    words: usize,
}

impl Pattern {
    fn new(chars: &[char]) -> Self {
        let words = chars.len().div_ceil(64).max(1);
        let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
        for (i, c) in chars.iter().enumerate() {
            masks.entry(*c).or_insert_with(|| vec![0; words])[i / 64] |= 1u64 << (i % 64);
        }
        Self {
            masks,
            len: chars.len(),
            words,
        }
    }

    /// 与 text 的最长公共子序列长度
    fn lcs(&self, text: &[char]) -> usize {
        let mut v = vec![u64::MAX; self.words];
        for c in text {
            let Some(m) = self.masks.get(c) else {
                continue;
            };
            let mut carry = false;
            for (w, mask) in v.iter_mut().zip(m) {
                let u = *w & mask;
                let (sum, c1) = w.overflowing_add(u);
                let (sum, c2) = sum.overflowing_add(carry as u64);
                carry = c1 || c2;
                *w = sum | (*w & !u);
            }
        }
        let mut zeros = 0usize;
        for (i, w) in v.iter().enumerate() {
            let bits = (self.len - i * 64).min(64);
            let valid = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            zeros += (!w & valid).count_ones() as usize;
        }
        zeros
    }
}

fn score(lcs: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (100.0 * (2 * lcs) as f64 / total as f64).round() as u8
}

fn normalize(s: &str) -> Vec<char> {
    s.trim().to_lowercase().chars().collect()
}

/// 局部相似度：较短串对较长串所有等长窗口的最高分
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a = normalize(a);
    let b = normalize(b);
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 100 } else { 0 };
    }

    let pattern = Pattern::new(&short);
    let total = short.len() * 2;
    let mut best = 0usize;
    for window in long.windows(short.len()) {
        let lcs = pattern.lcs(window);
        if lcs > best {
            best = lcs;
            if best == short.len() {
                break;
            }
        }
    }
    score(best, total)
}
