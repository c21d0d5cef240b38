// 该文件是 Dongfeng （东风） 项目的一部分。
// src/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

/// 超出标签表范围时显示的名称
pub const UNKNOWN_LABEL: &str = "unknown";

/// COCO 数据集类别名称，顺序与模型训练时一致
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];


/// 类别编号到名称的固定映射
///
/// 标签顺序假定与模型训练时的顺序一致，不做校验。
#[derive(Debug, Clone)]
pub struct ClassTable {
  names: Vec<String>,
}

impl Default for ClassTable {
  fn default() -> Self {
    Self::coco()
  }
}

impl ClassTable {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES)
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn label(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_table_in_training_order() {
    let table = ClassTable::coco();
    assert_eq!(table.len(), 80);
    assert_eq!(table.label(0), "person");
    assert_eq!(table.label(2), "car");
    assert_eq!(table.label(79), "toothbrush");
  }

  #[test]
  fn out_of_range_is_unknown() {
    let table = ClassTable::from_names(["cat", "dog"]);
    assert_eq!(table.label(1), "dog");
    assert_eq!(table.label(2), UNKNOWN_LABEL);
  }
}
