//! Page-wise retrieval helpers
//!
//! Drive `retrieve_many` in fixed-size pages until the backend returns an
//! empty page, either invoking a callback per block or accumulating a
//! single list.

use crate::context::Context;
use crate::error::Result;
use crate::manipulator::{Identity, Manipulable, Manipulator};

const DEFAULT_BLOCK_SIZE: u64 = 10_000;

/// Retrieve objects block by block, calling `each` for every block
///
/// Pagination set on the given context is overridden per page. A block size
/// of 0 uses the default of 10,000. Iteration stops at the first empty page
/// or when `each` returns an error.
pub async fn iter_func<M, T, F>(
    manipulator: &M,
    context: &Context,
    identity: &Identity,
    mut each: F,
    block_size: u64,
) -> Result<()>
where
    M: Manipulator,
    T: Manipulable,
    F: FnMut(Vec<T>) -> Result<()>,
{
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };

    let mut page = 0u64;

    loop {
        page += 1;

        let mut block: Vec<T> = Vec::new();
        let page_context = context.derive().with_page(page, block_size);
        manipulator
            .retrieve_many(&page_context, identity, &mut block)
            .await?;

        if block.is_empty() {
            return Ok(());
        }

        each(block)?;
    }
}

/// Retrieve all objects of an identity, accumulated across pages
pub async fn iter<M, T>(
    manipulator: &M,
    context: &Context,
    identity: &Identity,
    block_size: u64,
) -> Result<Vec<T>>
where
    M: Manipulator,
    T: Manipulable,
{
    let mut all: Vec<T> = Vec::new();

    iter_func(
        manipulator,
        context,
        identity,
        |mut block: Vec<T>| {
            all.append(&mut block);
            Ok(())
        },
        block_size,
    )
    .await?;

    Ok(all)
}
