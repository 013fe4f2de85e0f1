//! 最近 k 个值的滑动缓冲
//!
//! 固定容量的小缓冲，保存最近 `size` 个写入值（旧值在前）。
//! 答题场景用 `LatestBuffer<bool>` 检测连续答错：每次作答 push
//! 判定结果，`all_equal(&false)` 为真即触发连错提醒。

/// 保存最近 `size` 个值的缓冲区
///
/// 内部使用 `size + 1` 个槽位加一个写入游标：游标写到末尾后整体
/// 左移一格，前 `size` 个槽位始终是最近的 `size` 个值。
#[derive(Debug)]
pub struct LatestBuffer<T> {
    slots: Vec<Option<T>>,
    pivot: usize,
}

impl<T: PartialEq> LatestBuffer<T> {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..=size).map(|_| None).collect(),
            pivot: 0,
        }
    }

    /// 写入一个值，缓冲满时丢弃最旧的值
    pub fn push(&mut self, value: T) {
        self.slots[self.pivot] = Some(value);
        self.pivot += 1;

        if self.pivot > self.slots.len() - 1 {
            self.slots.rotate_left(1);
            self.pivot -= 1;
        }
    }

    /// 最近 `size` 个值是否全部等于 `value`
    ///
    /// 写入不足 `size` 个时返回 false。
    pub fn all_equal(&self, value: &T) -> bool {
        self.slots[..self.slots.len() - 1]
            .iter()
            .all(|slot| slot.as_ref() == Some(value))
    }

    /// 清空缓冲，清空后需要再写满 `size` 个值才可能匹配
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.pivot = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_full_never_matches() {
        let mut buffer = LatestBuffer::new(3);
        buffer.push(false);
        buffer.push(false);
        assert!(!buffer.all_equal(&false));
    }

    #[test]
    fn test_full_buffer_matches() {
        let mut buffer = LatestBuffer::new(3);
        for _ in 0..3 {
            buffer.push(false);
        }
        assert!(buffer.all_equal(&false));
        assert!(!buffer.all_equal(&true));
    }

    #[test]
    fn test_old_values_slide_out() {
        let mut buffer = LatestBuffer::new(3);
        buffer.push(true);
        buffer.push(false);
        buffer.push(false);
        assert!(!buffer.all_equal(&false));

        // true 被挤出窗口
        buffer.push(false);
        assert!(buffer.all_equal(&false));
    }

    #[test]
    fn test_streak_broken_by_correct_answer() {
        let mut buffer = LatestBuffer::new(2);
        buffer.push(false);
        buffer.push(false);
        assert!(buffer.all_equal(&false));

        buffer.push(true);
        assert!(!buffer.all_equal(&false));
    }

    #[test]
    fn test_clear_resets_window() {
        let mut buffer = LatestBuffer::new(2);
        buffer.push(false);
        buffer.push(false);
        assert!(buffer.all_equal(&false));

        buffer.clear();
        assert!(!buffer.all_equal(&false));

        // 清空后需要重新写满
        buffer.push(false);
        assert!(!buffer.all_equal(&false));
        buffer.push(false);
        assert!(buffer.all_equal(&false));
    }
}
