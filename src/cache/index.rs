//! 块索引（AVL 树）
//!
//! 以块号为键的高度平衡二叉搜索树。每个节点独占一个 [`CacheBlock`]，
//! 旋转只转移 `Box` 的所有权，不复制节点内容。
//!
//! # 平衡规则
//!
//! 每次插入或删除后自底向上重算高度，平衡因子超过 ±1 时旋转：
//!
//! - 右重且右孩子左倾：先右旋右孩子，再左旋（RL）
//! - 左重且左孩子右倾：先左旋左孩子，再右旋（LR）
//! - 其余情况：单次旋转
//!
//! 有两个孩子的节点被删除时，把右子树的最小节点整个摘下来顶替它的位置。

use super::buffer::CacheBlock;
use crate::error::Result;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering;

type Link = Option<Box<Node>>;

struct Node {
    key: u64,
    height: i32,
    block: CacheBlock,
    left: Link,
    right: Link,
}

fn height(link: &Link) -> i32 {
    link.as_ref().map_or(0, |node| node.height)
}

impl Node {
    fn new(block: CacheBlock) -> Box<Self> {
        Box::new(Self {
            key: block.block_no,
            height: 1,
            block,
            left: None,
            right: None,
        })
    }

    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    /// 左子树高度减右子树高度
    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.update_height();
    pivot.right = Some(node);
    pivot.update_height();
    pivot
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.update_height();
    pivot.left = Some(node);
    pivot.update_height();
    pivot
}

fn rebalance(mut node: Box<Node>) -> Box<Node> {
    node.update_height();
    let balance = node.balance();

    if balance > 1 {
        if node.left.as_ref().map_or(0, |left| left.balance()) < 0 {
            node.left = node.left.take().map(rotate_left);
        }
        return rotate_right(node);
    }

    if balance < -1 {
        if node.right.as_ref().map_or(0, |right| right.balance()) > 0 {
            node.right = node.right.take().map(rotate_right);
        }
        return rotate_left(node);
    }

    node
}

/// 返回新的子树根；键已存在时原样返回被拒绝的块
fn insert_node(link: Link, block: CacheBlock) -> (Box<Node>, Option<CacheBlock>) {
    let Some(mut node) = link else {
        return (Node::new(block), None);
    };

    match block.block_no.cmp(&node.key) {
        Ordering::Equal => (node, Some(block)),
        Ordering::Less => {
            let (child, rejected) = insert_node(node.left.take(), block);
            node.left = Some(child);
            if rejected.is_some() {
                return (node, rejected);
            }
            (rebalance(node), None)
        }
        Ordering::Greater => {
            let (child, rejected) = insert_node(node.right.take(), block);
            node.right = Some(child);
            if rejected.is_some() {
                return (node, rejected);
            }
            (rebalance(node), None)
        }
    }
}

/// 摘下子树中键最小的节点，返回（剩余子树，最小节点）
fn take_min(mut node: Box<Node>) -> (Link, Box<Node>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (rest, node)
        }
        Some(left) => {
            let (rest, min) = take_min(left);
            node.left = rest;
            (Some(rebalance(node)), min)
        }
    }
}

fn remove_node(link: Link, key: u64) -> (Link, Option<CacheBlock>) {
    let Some(mut node) = link else {
        return (None, None);
    };

    match key.cmp(&node.key) {
        Ordering::Less => {
            let (child, removed) = remove_node(node.left.take(), key);
            node.left = child;
            if removed.is_none() {
                return (Some(node), None);
            }
            (Some(rebalance(node)), removed)
        }
        Ordering::Greater => {
            let (child, removed) = remove_node(node.right.take(), key);
            node.right = child;
            if removed.is_none() {
                return (Some(node), None);
            }
            (Some(rebalance(node)), removed)
        }
        Ordering::Equal => {
            let Node { block, left, right, .. } = *node;
            let replacement = match (left, right) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = take_min(right);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor))
                }
            };
            (replacement, Some(block))
        }
    }
}

/// 后序释放：先左右子树，再块缓冲区，最后节点本身
fn destroy(link: Link) -> usize {
    let Some(node) = link else {
        return 0;
    };
    let Node { block, left, right, .. } = *node;
    let freed = destroy(left) + destroy(right);
    drop(block);
    freed + 1
}

fn walk<'a>(link: &'a Link, f: &mut impl FnMut(&'a CacheBlock)) {
    if let Some(node) = link {
        walk(&node.left, f);
        f(&node.block);
        walk(&node.right, f);
    }
}

fn try_walk_mut(link: &mut Link, f: &mut impl FnMut(&mut CacheBlock) -> Result<()>) -> Result<()> {
    if let Some(node) = link {
        try_walk_mut(&mut node.left, f)?;
        f(&mut node.block)?;
        try_walk_mut(&mut node.right, f)?;
    }
    Ok(())
}

/// 检查子树，返回其高度；不满足有序或平衡时返回 None
fn check(link: &Link, lower: Option<u64>, upper: Option<u64>) -> Option<i32> {
    let Some(node) = link else {
        return Some(0);
    };
    if lower.is_some_and(|lo| node.key <= lo) || upper.is_some_and(|hi| node.key >= hi) {
        return None;
    }
    if node.block.block_no != node.key {
        return None;
    }
    let lh = check(&node.left, lower, Some(node.key))?;
    let rh = check(&node.right, Some(node.key), upper)?;
    if (lh - rh).abs() > 1 || node.height != 1 + lh.max(rh) {
        return None;
    }
    Some(node.height)
}

/// 块索引
///
/// 恰好反映一个文件上下文当前驻留的块集合，键唯一。
#[derive(Default)]
pub struct BlockIndex {
    root: Link,
    len: usize,
}

impl BlockIndex {
    /// 创建空索引
    pub const fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// 插入块，键为 `block.block_no`
    ///
    /// # 返回
    ///
    /// 键已存在时不做任何修改并返回 `false`
    pub fn insert(&mut self, block: CacheBlock) -> bool {
        let key = block.block_no;
        let (root, rejected) = insert_node(self.root.take(), block);
        self.root = Some(root);
        if rejected.is_some() {
            log::warn!("[INDEX] insert of block {} ignored: already present", key);
            return false;
        }
        self.len += 1;
        log::trace!("[INDEX] inserted block {}, len={}, height={}", key, self.len, self.height());
        true
    }

    /// 查找块，不分配内存
    pub fn get(&self, key: u64) -> Option<&CacheBlock> {
        let mut cur = self.root.as_deref();
        while let Some(node) = cur {
            match key.cmp(&node.key) {
                Ordering::Equal => return Some(&node.block),
                Ordering::Less => cur = node.left.as_deref(),
                Ordering::Greater => cur = node.right.as_deref(),
            }
        }
        None
    }

    /// 查找块（可变）
    pub fn get_mut(&mut self, key: u64) -> Option<&mut CacheBlock> {
        let mut cur = self.root.as_deref_mut();
        while let Some(node) = cur {
            match key.cmp(&node.key) {
                Ordering::Equal => return Some(&mut node.block),
                Ordering::Less => cur = node.left.as_deref_mut(),
                Ordering::Greater => cur = node.right.as_deref_mut(),
            }
        }
        None
    }

    /// 是否包含键
    pub fn contains(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// 删除块并返回它
    ///
    /// 键不存在时返回 `None`，索引不变。
    pub fn remove(&mut self, key: u64) -> Option<CacheBlock> {
        let (root, removed) = remove_node(self.root.take(), key);
        self.root = root;
        match removed {
            Some(block) => {
                self.len -= 1;
                log::trace!("[INDEX] removed block {}, len={}", key, self.len);
                Some(block)
            }
            None => {
                log::warn!("[INDEX] remove of block {} ignored: not present", key);
                None
            }
        }
    }

    /// 释放所有节点和块缓冲区
    ///
    /// 对空树调用是安全的。
    ///
    /// # 返回
    ///
    /// 释放的节点数
    pub fn clear(&mut self) -> usize {
        let freed = destroy(self.root.take());
        self.len = 0;
        freed
    }

    /// 按块号升序访问每个块
    pub fn for_each(&self, mut f: impl FnMut(&CacheBlock)) {
        walk(&self.root, &mut f);
    }

    /// 按块号升序访问每个块（可变），遇到第一个错误即停止
    pub fn try_for_each_mut(&mut self, mut f: impl FnMut(&mut CacheBlock) -> Result<()>) -> Result<()> {
        try_walk_mut(&mut self.root, &mut f)
    }

    /// 升序的全部键
    pub fn keys(&self) -> Vec<u64> {
        let mut keys = Vec::with_capacity(self.len);
        self.for_each(|block| keys.push(block.block_no));
        keys
    }

    /// 脏块数量
    pub fn dirty_count(&self) -> usize {
        let mut count = 0;
        self.for_each(|block| {
            if block.is_dirty() {
                count += 1;
            }
        });
        count
    }

    /// 节点数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// 树高（空树为 0）
    pub fn height(&self) -> i32 {
        height(&self.root)
    }

    /// 检查有序性、平衡性和缓存的高度是否一致
    pub fn is_valid(&self) -> bool {
        check(&self.root, None, None).is_some()
    }
}

impl core::fmt::Debug for BlockIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockIndex")
            .field("len", &self.len)
            .field("height", &self.height())
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};

    fn block(key: u64) -> CacheBlock {
        CacheBlock::alloc(key, 8).unwrap()
    }

    /// 线性同余生成器，保证测试可复现
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    #[test]
    fn test_empty_index() {
        let mut index = BlockIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.height(), 0);
        assert!(index.get(0).is_none());
        assert!(index.remove(0).is_none());
        assert_eq!(index.clear(), 0);
        assert!(index.is_valid());
    }

    #[test]
    fn test_ascending_inserts_stay_balanced() {
        let mut index = BlockIndex::new();
        for key in 0..1000 {
            assert!(index.insert(block(key)));
            assert!(index.is_valid());
        }
        assert_eq!(index.len(), 1000);
        // AVL 高度上界约 1.44 * log2(n)
        assert!(index.height() <= 14);
        assert_eq!(index.keys(), (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_double_rotations() {
        // 右重且右孩子左倾：RL
        let mut index = BlockIndex::new();
        for key in [10, 30, 20] {
            index.insert(block(key));
        }
        assert_eq!(index.height(), 2);
        assert!(index.is_valid());
        assert_eq!(index.root.as_ref().unwrap().key, 20);

        // 左重且左孩子右倾：LR
        let mut index = BlockIndex::new();
        for key in [30, 10, 20] {
            index.insert(block(key));
        }
        assert_eq!(index.height(), 2);
        assert_eq!(index.root.as_ref().unwrap().key, 20);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut index = BlockIndex::new();
        let mut first = block(5);
        first.data[0] = 1;
        assert!(index.insert(first));

        let mut second = block(5);
        second.data[0] = 2;
        assert!(!index.insert(second));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(5).unwrap().data[0], 1);
    }

    #[test]
    fn test_remove_cases() {
        let mut index = BlockIndex::new();
        for key in [50, 30, 70, 20, 40, 60, 80, 35] {
            index.insert(block(key));
        }

        // 叶子
        assert_eq!(index.remove(80).unwrap().block_no, 80);
        assert!(index.is_valid());
        // 单孩子
        assert_eq!(index.remove(40).unwrap().block_no, 40);
        assert!(index.is_valid());
        // 两个孩子（根）
        let root = index.root.as_ref().unwrap().key;
        assert_eq!(index.remove(root).unwrap().block_no, root);
        assert!(index.is_valid());

        assert!(index.remove(999).is_none());
        assert_eq!(index.len(), 5);
        let keys = index.keys();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_random_inserts_and_removes() {
        let mut index = BlockIndex::new();
        let mut present = alloc::collections::BTreeSet::new();
        let mut rng = Lcg(42);

        for _ in 0..4000 {
            let key = rng.next() % 256;
            if rng.next() % 3 == 0 {
                assert_eq!(index.remove(key).is_some(), present.remove(&key));
            } else {
                assert_eq!(index.insert(block(key)), present.insert(key));
            }
            assert!(index.is_valid());
            assert_eq!(index.len(), present.len());
        }
        assert_eq!(index.keys(), present.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_get_mut_and_dirty_walk() {
        let mut index = BlockIndex::new();
        for key in 0..6 {
            index.insert(block(key));
        }
        index.get_mut(2).unwrap().mark_dirty();
        index.get_mut(4).unwrap().mark_dirty();
        assert_eq!(index.dirty_count(), 2);

        let mut visited = Vec::new();
        index
            .try_for_each_mut(|block| {
                if block.is_dirty() {
                    visited.push(block.block_no);
                    block.mark_clean();
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, [2, 4]);
        assert_eq!(index.dirty_count(), 0);
    }

    #[test]
    fn test_try_for_each_mut_stops_on_error() {
        let mut index = BlockIndex::new();
        for key in 0..6 {
            index.insert(block(key));
        }
        let mut seen = 0;
        let result = index.try_for_each_mut(|block| {
            seen += 1;
            if block.block_no == 2 {
                return Err(Error::new(ErrorKind::Io, "injected"));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_clear_frees_everything() {
        let mut index = BlockIndex::new();
        for key in 0..31 {
            index.insert(block(key));
        }
        assert_eq!(index.clear(), 31);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.clear(), 0);
    }
}
