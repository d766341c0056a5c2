//! Transformer trait for data transformation

/// Transformer trait for transforming data items
///
/// Implementors define how a single raw item becomes an output item:
/// - Field renaming and flattening
/// - Type coercion
/// - Validation
///
/// Transformers are pure: no I/O and no shared mutable state, so one
/// instance can be used from any number of streams at once.
///
/// # Example
/// ```
/// use tap_shopify::etl::Transformer;
/// use serde_json::Value;
///
/// struct FieldDropper {
///     fields: Vec<String>,
/// }
///
/// impl Transformer for FieldDropper {
///     type Input = Value;
///     type Output = Value;
///     type Error = std::convert::Infallible;
///
///     fn transform(&self, mut input: Self::Input) -> Result<Self::Output, Self::Error> {
///         if let Some(obj) = input.as_object_mut() {
///             for field in &self.fields {
///                 obj.remove(field);
///             }
///         }
///         Ok(input)
///     }
/// }
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input;

    /// Output item type after transformation
    type Output: Send;

    /// Error raised for an item that cannot be transformed
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if the item fails validation or conversion
    fn transform(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;

    /// Transform multiple items, keeping failures alongside successes
    ///
    /// One bad item never hides the rest.
    fn transform_each<I>(&self, inputs: I) -> Vec<Result<Self::Output, Self::Error>>
    where
        I: IntoIterator<Item = Self::Input>,
    {
        inputs.into_iter().map(|i| self.transform(i)).collect()
    }
}
