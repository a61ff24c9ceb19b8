// 该文件是 Jiannan （剑南东川） 项目的一部分。
// src/model/nms.rs - 贪心非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::model::{DetectItem, DetectResult};

/// 计算两个归一化框的 IoU
///
/// 交集按夹紧后的重叠计算；并集不大于 0 时定义 IoU 为 0，
/// 退化框（零面积、反向）不会导致除零。
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let left = a[0].max(b[0]);
  let top = a[1].max(b[1]);
  let right = a[2].min(b[2]);
  let bottom = a[3].min(b[3]);

  let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);

  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union <= 0.0 { 0.0 } else { intersection / union }
}

/// 贪心 NMS，返回保留项在 items 中的索引，按接受顺序排列
///
/// 抑制不区分类别，与参考行为一致；换成逐类别抑制会改变可观察的
/// 检测数量。候选量级为每帧几十个，O(n^2) 足够。
pub fn suppress(items: &[DetectItem], score_threshold: f32, iou_threshold: f32) -> Vec<usize> {
  let mut order: Vec<usize> = (0..items.len())
    .filter(|&index| items[index].score > score_threshold)
    .collect();
  // 稳定排序: 分数相同的保持扫描顺序
  order.sort_by(|&a, &b| items[b].score.total_cmp(&items[a].score));

  let mut active = vec![true; order.len()];
  let mut selected = Vec::new();

  for i in 0..order.len() {
    if !active[i] {
      continue;
    }
    selected.push(order[i]);
    for j in (i + 1)..order.len() {
      if active[j] && iou(&items[order[i]].bbox, &items[order[j]].bbox) > iou_threshold {
        active[j] = false;
      }
    }
  }

  selected
}

/// 对候选序列做抑制并折叠为最终检测结果
pub fn filter_detections(
  items: Vec<DetectItem>,
  score_threshold: f32,
  iou_threshold: f32,
) -> DetectResult {
  let selected = suppress(&items, score_threshold, iou_threshold);
  DetectResult {
    items: selected
      .into_iter()
      .map(|index| items[index].clone())
      .collect(),
  }
}
