//! Pagination and search helpers shared by list views.

/// One page of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
  pub items: Vec<T>,
  /// 1-based, clamped into `1..=total_pages`
  pub current_page: usize,
  /// At least 1, even for an empty list
  pub total_pages: usize,
  /// Index of the first item on this page
  pub start_index: usize,
  /// One past the last item on this page
  pub end_index: usize,
  pub total_items: usize,
}

impl<T> Page<T> {
  /// "Showing 11-20 of 42 services"
  pub fn summary(&self, item_name: &str) -> String {
    if self.total_items == 0 {
      return format!("No {}", item_name);
    }
    format!(
      "Showing {}-{} of {} {}",
      self.start_index + 1,
      self.end_index,
      self.total_items,
      item_name
    )
  }
}

/// Slice `items` into page `page` of `per_page` items.
///
/// Out-of-range pages are clamped; `per_page` of zero is treated as one.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
  let per_page = per_page.max(1);
  let total_items = items.len();
  let total_pages = total_items.div_ceil(per_page).max(1);
  let current_page = page.clamp(1, total_pages);

  let start_index = ((current_page - 1) * per_page).min(total_items);
  let end_index = (start_index + per_page).min(total_items);

  Page {
    items: items[start_index..end_index].to_vec(),
    current_page,
    total_pages,
    start_index,
    end_index,
    total_items,
  }
}

/// An entry in a page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMarker {
  Page(usize),
  Gap,
}

/// Page selector: first, last and the neighbours of `current`, with gaps.
///
/// A gap that would hide a single page shows that page instead.
pub fn page_numbers(current: usize, total: usize) -> Vec<PageMarker> {
  if total == 0 {
    return Vec::new();
  }
  let current = current.clamp(1, total);

  let mut shown: Vec<usize> = [1, current.saturating_sub(1), current, current + 1, total]
    .into_iter()
    .filter(|p| (1..=total).contains(p))
    .collect();
  shown.sort_unstable();
  shown.dedup();

  let mut markers = Vec::with_capacity(shown.len() + 2);
  let mut previous = 0;
  for page in shown {
    match page - previous {
      1 => {}
      2 => markers.push(PageMarker::Page(previous + 1)),
      _ if previous > 0 => markers.push(PageMarker::Gap),
      _ => {}
    }
    markers.push(PageMarker::Page(page));
    previous = page;
  }

  markers
}

/// Case-insensitive substring search over the fields `fields` exposes.
///
/// An empty query keeps everything.
pub fn filter_items<T, F>(items: &[T], query: &str, fields: F) -> Vec<T>
where
  T: Clone,
  F: Fn(&T) -> Vec<&str>,
{
  let needle = query.trim().to_lowercase();
  if needle.is_empty() {
    return items.to_vec();
  }

  items
    .iter()
    .filter(|item| {
      fields(*item)
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    })
    .cloned()
    .collect()
}
